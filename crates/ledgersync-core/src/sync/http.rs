//! HTTP transport for the sync backend.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::models::{EntityType, SyncQueueEntry, SyncableEntity};
use crate::util::compact_text;

use super::{BackendError, BackendResult, DownstreamDelta, SyncBackend, UpstreamResponse};

const TENANT_HEADER: &str = "X-Tenant-Id";

#[derive(Clone)]
pub struct HttpSyncBackend {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncBackend")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    tenant_id: &'a str,
    changes: &'a [SyncQueueEntry],
}

impl HttpSyncBackend {
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            base_url: config.base_url.clone(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder, tenant_id: &str) -> RequestBuilder {
        let request = request
            .header(TENANT_HEADER, tenant_id)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn collection_url(&self, action: &str, entity_type: EntityType) -> String {
        format!(
            "{}/sync/{action}/{}",
            self.base_url,
            urlencoding::encode(entity_type.as_str())
        )
    }
}

impl SyncBackend for HttpSyncBackend {
    async fn upstream(
        &self,
        tenant_id: &str,
        batch: &[SyncQueueEntry],
    ) -> BackendResult<UpstreamResponse> {
        let request = self
            .client
            .post(format!("{}/sync/upstream", self.base_url))
            .json(&UpstreamRequest {
                tenant_id,
                changes: batch,
            });
        let response = self.authorize(request, tenant_id).send().await?;
        read_json(response).await
    }

    async fn downstream(
        &self,
        tenant_id: &str,
        entity_type: EntityType,
        since: &str,
    ) -> BackendResult<DownstreamDelta> {
        let request = self
            .client
            .get(self.collection_url("downstream", entity_type))
            .query(&[("since", since)]);
        let response = self.authorize(request, tenant_id).send().await?;
        read_json(response).await
    }

    async fn initial(
        &self,
        tenant_id: &str,
        entity_type: EntityType,
    ) -> BackendResult<Vec<SyncableEntity>> {
        let request = self.client.get(self.collection_url("initial", entity_type));
        let response = self.authorize(request, tenant_id).send().await?;
        read_json(response).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> BackendResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Api(parse_api_error(status, &body)));
    }

    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|error| BackendError::InvalidPayload(format!("{error}: {}", compact_text(&body))))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
