//! Outcome summaries of sync passes

use serde::Serialize;

use crate::models::EntityType;

/// Result of one LWW batch merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Records with no local counterpart
    pub inserted: u64,
    /// Local records replaced by a strictly newer incoming one
    pub updated: u64,
    /// Incoming records that lost to the local copy
    pub skipped: u64,
    /// Records dropped because their deletion is still in flight
    pub excluded: u64,
}

impl MergeStats {
    #[must_use]
    pub const fn applied(&self) -> u64 {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpstreamReport {
    pub submitted: u64,
    pub acknowledged: u64,
    pub failed: u64,
    /// Entries that reached the attempt cap during this pass
    pub exhausted: u64,
}

impl UpstreamReport {
    pub(crate) fn absorb(&mut self, other: Self) {
        self.submitted += other.submitted;
        self.acknowledged += other.acknowledged;
        self.failed += other.failed;
        self.exhausted += other.exhausted;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownstreamReport {
    pub entity_type: EntityType,
    pub deleted: u64,
    pub merge: MergeStats,
    /// Checkpoint stored after the delta was applied
    pub checkpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitialSyncReport {
    pub completed: Vec<EntityType>,
    pub failed: Vec<(EntityType, String)>,
}

impl InitialSyncReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Summary of a full `synchronize` pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Entries reclaimed from `processing` before the pass
    pub reset_stuck: u64,
    pub upstream: Option<UpstreamReport>,
    pub initial: Option<InitialSyncReport>,
    pub downstream: Vec<DownstreamReport>,
    /// Failures encountered along the way, joined
    pub error: Option<String>,
}

impl SyncReport {
    pub(crate) fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{existing}; {message}"),
            None => message,
        });
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_error_joins_messages() {
        let mut report = SyncReport::default();
        assert!(report.is_success());

        report.push_error("upstream: offline");
        report.push_error("account: timeout");

        assert_eq!(
            report.error.as_deref(),
            Some("upstream: offline; account: timeout")
        );
    }

    #[test]
    fn upstream_reports_accumulate() {
        let mut total = UpstreamReport::default();
        total.absorb(UpstreamReport {
            submitted: 3,
            acknowledged: 2,
            failed: 1,
            exhausted: 0,
        });
        total.absorb(UpstreamReport {
            submitted: 1,
            acknowledged: 0,
            failed: 1,
            exhausted: 1,
        });

        assert_eq!(total.submitted, 4);
        assert_eq!(total.failed, 2);
        assert_eq!(total.exhausted, 1);
    }
}
