//! Synced entity model

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::util::parse_timestamp;

/// Collection a synced record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Account,
    AccountGroup,
    Category,
    CategoryGroup,
    Transaction,
}

impl EntityType {
    /// Every collection tracked by default, in hydration order
    pub const ALL: [Self; 5] = [
        Self::AccountGroup,
        Self::Account,
        Self::CategoryGroup,
        Self::Category,
        Self::Transaction,
    ];

    /// Storage and wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::AccountGroup => "account_group",
            Self::Category => "category",
            Self::CategoryGroup => "category_group",
            Self::Transaction => "transaction",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    /// Accepts `account_group`, `account-group` and `AccountGroup` spellings.
    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match folded.as_str() {
            "account" => Ok(Self::Account),
            "accountgroup" => Ok(Self::AccountGroup),
            "category" => Ok(Self::Category),
            "categorygroup" => Ok(Self::CategoryGroup),
            "transaction" => Ok(Self::Transaction),
            _ => Err(Error::InvalidInput(format!("unknown entity type: {s}"))),
        }
    }
}

/// Any record that takes part in sync.
///
/// Only `id` and `updated_at` carry meaning for the sync core; every other
/// field travels untouched in `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableEntity {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(alias = "updatedAt")]
    pub updated_at: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncableEntity {
    /// Build a record from a JSON object
    pub fn from_value(value: Value) -> Result<Self> {
        let entity: Self = serde_json::from_value(value)?;
        if entity.id.trim().is_empty() {
            return Err(Error::InvalidInput("record id cannot be empty".into()));
        }
        Ok(entity)
    }

    /// Full JSON snapshot of the record
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Compare two `updated_at` stamps chronologically.
///
/// Falls back to a plain string comparison when either side is not RFC 3339.
pub fn compare_timestamps(left: &str, right: &str) -> Ordering {
    match (parse_timestamp(left), parse_timestamp(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => left.cmp(right),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(value: RawId) -> Self {
        match value {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

/// Backends may hand out numeric ids; they are normalised to strings.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

pub(crate) fn deserialize_ids<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<RawId>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(String::from).collect())
}
