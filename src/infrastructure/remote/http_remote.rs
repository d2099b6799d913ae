use crate::application::ports::remote_service::{
    CreateRequest, PullQuery, RemoteError, RemotePage, RemoteRecord, RemoteService,
    UpdateRequest,
};
use crate::domain::value_objects::{EntityType, LocalId, ServerId, TenantId};
use crate::shared::config::RemoteConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct WireRecord {
    id: String,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    fields: Value,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct WirePage {
    items: Vec<WireRecord>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUpload {
    url: String,
}

/// `RemoteService` over the tenant-scoped JSON resource API:
/// `{base}/{tenant}/{resource}[/{id}[/attachment]]`.
#[derive(Clone)]
pub struct HttpRemoteService {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpRemoteService {
    pub fn new(config: &RemoteConfig, request_timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| AppError::ConfigurationError(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, tenant_id: &TenantId, entity_type: EntityType) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            tenant_id.as_str(),
            entity_type.resource_name()
        )
    }

    fn item_url(&self, tenant_id: &TenantId, entity_type: EntityType, id: &ServerId) -> String {
        format!(
            "{}/{}",
            self.collection_url(tenant_id, entity_type),
            id.as_str()
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

fn status_error(status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::NOT_FOUND | StatusCode::GONE => RemoteError::NotFound,
        StatusCode::REQUEST_TIMEOUT => RemoteError::Timeout,
        StatusCode::TOO_MANY_REQUESTS => RemoteError::Server {
            status: status.as_u16(),
        },
        s if s.is_server_error() => RemoteError::Server { status: s.as_u16() },
        s => RemoteError::Rejected {
            status: s.as_u16(),
            message: body.chars().take(512).collect(),
        },
    }
}

fn into_remote_record(
    wire: WireRecord,
    tenant_id: &TenantId,
    entity_type: EntityType,
) -> Result<RemoteRecord, RemoteError> {
    let server_id = ServerId::new(wire.id).map_err(RemoteError::Decode)?;
    let tenant_id = match wire.tenant_id {
        Some(value) => TenantId::new(value).map_err(RemoteError::Decode)?,
        None => tenant_id.clone(),
    };
    // ids minted by other clients are not ours to parse strictly
    let client_id = wire
        .client_id
        .as_deref()
        .and_then(|value| LocalId::from_str(value).ok());
    let parent_server_id = wire
        .parent_id
        .map(ServerId::new)
        .transpose()
        .map_err(RemoteError::Decode)?;

    Ok(RemoteRecord {
        server_id,
        entity_type,
        tenant_id,
        client_id,
        parent_server_id,
        fields: wire.fields,
        updated_at: wire.updated_at,
        deleted: wire.deleted,
    })
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn decode_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, RemoteError> {
    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::Decode(e.to_string()))
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn list_page(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        query: &PullQuery,
        cursor: Option<&str>,
    ) -> Result<RemotePage, RemoteError> {
        let url = self.collection_url(tenant_id, entity_type);
        let mut params = vec![
            ("window_start", rfc3339(query.window_start)),
            ("window_end", rfc3339(query.window_end)),
        ];
        if let Some(since) = query.modified_since {
            params.push(("modified_since", rfc3339(since)));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let page: WirePage =
            decode_json(self.send(self.request(Method::GET, &url).query(&params)).await?).await?;
        let records = page
            .items
            .into_iter()
            .map(|item| into_remote_record(item, tenant_id, entity_type))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RemotePage {
            records,
            next_cursor: page.next_cursor.filter(|next| !next.is_empty()),
        })
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
    ) -> Result<RemoteRecord, RemoteError> {
        let url = self.item_url(tenant_id, entity_type, server_id);
        let wire: WireRecord = decode_json(self.send(self.request(Method::GET, &url)).await?).await?;
        into_remote_record(wire, tenant_id, entity_type)
    }

    async fn create(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        request: &CreateRequest,
    ) -> Result<RemoteRecord, RemoteError> {
        let url = self.collection_url(tenant_id, entity_type);
        let builder = self.request(Method::POST, &url).json(request);
        let wire: WireRecord = decode_json(self.send(builder).await?).await?;
        into_remote_record(wire, tenant_id, entity_type)
    }

    async fn update(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
        request: &UpdateRequest,
    ) -> Result<RemoteRecord, RemoteError> {
        let url = self.item_url(tenant_id, entity_type, server_id);
        let builder = self.request(Method::PATCH, &url).json(request);
        let wire: WireRecord = decode_json(self.send(builder).await?).await?;
        into_remote_record(wire, tenant_id, entity_type)
    }

    async fn delete(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
    ) -> Result<(), RemoteError> {
        let url = self.item_url(tenant_id, entity_type, server_id);
        self.send(self.request(Method::DELETE, &url)).await?;
        Ok(())
    }

    async fn upload_attachment(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        server_id: &ServerId,
        content_type: &str,
        payload: Bytes,
    ) -> Result<String, RemoteError> {
        let url = format!("{}/attachment", self.item_url(tenant_id, entity_type, server_id));
        let builder = self
            .request(Method::POST, &url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(payload);
        let upload: WireUpload = decode_json(self.send(builder).await?).await?;
        Ok(upload.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant() -> TenantId {
        TenantId::new("acme".into()).unwrap()
    }

    #[test]
    fn statuses_map_onto_the_error_taxonomy() {
        assert_eq!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            RemoteError::Server { status: 503 }
        );
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, String::new()),
            RemoteError::NotFound
        );
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            RemoteError::Unauthorized
        );
        let rejected = status_error(StatusCode::CONFLICT, "duplicate key".into());
        assert_eq!(
            rejected,
            RemoteError::Rejected {
                status: 409,
                message: "duplicate key".into()
            }
        );
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn wire_records_fall_back_to_request_tenant() {
        let client_id = LocalId::generate();
        let wire: WireRecord = serde_json::from_value(json!({
            "id": "job-1",
            "client_id": client_id.to_string(),
            "parent_id": "cust-1",
            "fields": {"title": "Boiler"},
            "updated_at": "2025-03-01T10:00:00Z"
        }))
        .unwrap();
        let record = into_remote_record(wire, &tenant(), EntityType::Job).unwrap();
        assert_eq!(record.server_id.as_str(), "job-1");
        assert_eq!(record.tenant_id, tenant());
        assert_eq!(record.client_id, Some(client_id));
        assert_eq!(record.parent_server_id.unwrap().as_str(), "cust-1");
        assert!(!record.deleted);
    }

    #[test]
    fn foreign_client_ids_are_ignored() {
        let wire: WireRecord = serde_json::from_value(json!({
            "id": "job-2",
            "client_id": "web-42",
            "updated_at": "2025-03-01T10:00:00Z",
            "deleted": true
        }))
        .unwrap();
        let record = into_remote_record(wire, &tenant(), EntityType::Job).unwrap();
        assert_eq!(record.client_id, None);
        assert!(record.deleted);
    }

    #[test]
    fn urls_use_resource_names() {
        let remote = HttpRemoteService::new(
            &RemoteConfig {
                base_url: "https://api.example.com/v1/".into(),
                api_token: None,
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let id = ServerId::new("li-7".into()).unwrap();
        assert_eq!(
            remote.item_url(&tenant(), EntityType::LineItem, &id),
            "https://api.example.com/v1/acme/line-items/li-7"
        );
    }
}
