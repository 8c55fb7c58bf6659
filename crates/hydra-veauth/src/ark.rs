//! Ark OpenAPI operations for the credential exchange.
//!
//! Two signed calls against the Volcengine OpenAPI: `ListApiKeys` to find
//! the account's first API key id, then `GetRawApiKey` to fetch its key
//! material. [`get_ark_api_key`] chains them.

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{Result, VeauthError};
use crate::sign::{RequestSigner, canonical_query};

/// Default OpenAPI endpoint.
const DEFAULT_ENDPOINT: &str = "https://open.volcengineapi.com";

/// Default region.
const DEFAULT_REGION: &str = "cn-beijing";

/// Service name for signing scope.
const SERVICE: &str = "ark";

/// OpenAPI version for the Ark service.
const API_VERSION: &str = "2024-01-01";

/// Project whose keys are listed.
const DEFAULT_PROJECT: &str = "default";

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Options for the credential exchange.
#[derive(Debug, Clone, Default)]
pub struct ExchangeOptions {
    /// Region for the signing scope. Defaults to `cn-beijing`.
    pub region: Option<String>,

    /// STS session token, for temporary credentials.
    pub session_token: Option<String>,

    /// OpenAPI endpoint override.
    pub endpoint: Option<String>,
}

impl ExchangeOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set an STS session token.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Override the OpenAPI endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Signed client for the Ark OpenAPI.
pub struct ArkClient {
    http: Client,
    signer: RequestSigner,
    endpoint: String,
}

impl ArkClient {
    /// Create a client from static credentials.
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        options: ExchangeOptions,
    ) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| VeauthError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            signer: RequestSigner {
                access_key: access_key.into(),
                secret_key: secret_key.into(),
                session_token: options.session_token,
                region: options.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
                service: SERVICE.to_string(),
            },
            endpoint: options
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        })
    }

    /// List the API keys of a project; returns their numeric ids.
    pub async fn list_api_keys(&self, project_name: &str) -> Result<Vec<i64>> {
        let body = serde_json::json!({ "ProjectName": project_name });
        let result: ListApiKeysResult = self.call("ListApiKeys", &[], &body).await?;
        Ok(result.items.into_iter().map(|item| item.id).collect())
    }

    /// Fetch the raw key material for an API key id.
    pub async fn get_raw_api_key(&self, id: i64) -> Result<Option<String>> {
        let id = id.to_string();
        let body = serde_json::json!({});
        let result: GetRawApiKeyResult =
            self.call("GetRawApiKey", &[("Id", id.as_str())], &body).await?;
        Ok(result.api_key)
    }

    /// Issue one signed OpenAPI call and unwrap its `Result` envelope.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        extra_query: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<T> {
        let mut params = vec![("Action", action), ("Version", API_VERSION)];
        params.extend_from_slice(extra_query);
        let query = canonical_query(&params);

        let body_bytes = serde_json::to_vec(body)?;
        let host = self
            .endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://");

        let headers = self
            .signer
            .sign("POST", host, &query, &body_bytes, Utc::now());

        tracing::debug!(action = action, host = host, "Calling Ark OpenAPI");

        let mut request = self
            .http
            .post(format!("{}/?{}", self.endpoint, query))
            .header("Content-Type", "application/json")
            .header("Host", host)
            .header("X-Date", &headers.x_date)
            .header("X-Content-Sha256", &headers.x_content_sha256)
            .header("Authorization", &headers.authorization)
            .body(body_bytes);

        if let Some(token) = &headers.security_token {
            request = request.header("X-Security-Token", token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let envelope: ResponseEnvelope<T> = serde_json::from_str(&text)
            .map_err(|e| VeauthError::Serialization(format!("{} (HTTP {})", e, status)))?;

        if let Some(error) = envelope.metadata.and_then(|m| m.error) {
            return Err(VeauthError::Api {
                code: error.code,
                message: error.message,
            });
        }

        envelope
            .result
            .ok_or_else(|| VeauthError::Serialization("response carried no Result".to_string()))
    }
}

/// Exchange Volcengine credentials for the account's first Ark API key.
pub async fn get_ark_api_key(
    access_key: impl Into<String>,
    secret_key: impl Into<String>,
    options: ExchangeOptions,
) -> Result<String> {
    let client = ArkClient::new(access_key, secret_key, options)?;

    let ids = client.list_api_keys(DEFAULT_PROJECT).await?;
    let first = ids.first().copied().ok_or(VeauthError::EmptyKeyList)?;

    client
        .get_raw_api_key(first)
        .await?
        .ok_or(VeauthError::MissingApiKey)
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ResponseEnvelope<T> {
    #[serde(rename = "ResponseMetadata", default)]
    metadata: Option<ResponseMetadata>,
    #[serde(rename = "Result")]
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(rename = "Error", default)]
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "Code", default)]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListApiKeysResult {
    #[serde(rename = "Items", default)]
    items: Vec<ApiKeyItem>,
}

#[derive(Debug, Deserialize)]
struct ApiKeyItem {
    #[serde(rename = "Id")]
    id: i64,
}

#[derive(Debug, Deserialize)]
struct GetRawApiKeyResult {
    #[serde(rename = "ApiKey")]
    api_key: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn options_for(server: &mockito::ServerGuard) -> ExchangeOptions {
        ExchangeOptions::new().with_endpoint(server.url())
    }

    #[tokio::test]
    async fn test_full_exchange() {
        let mut server = mockito::Server::new_async().await;

        let list_mock = server
            .mock("POST", "/")
            .match_query(mockito::Matcher::UrlEncoded(
                "Action".into(),
                "ListApiKeys".into(),
            ))
            .with_status(200)
            .with_body(r#"{"ResponseMetadata": {}, "Result": {"Items": [{"Id": 42}, {"Id": 43}]}}"#)
            .create_async()
            .await;

        let raw_mock = server
            .mock("POST", "/")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("Action".into(), "GetRawApiKey".into()),
                mockito::Matcher::UrlEncoded("Id".into(), "42".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"ResponseMetadata": {}, "Result": {"ApiKey": "ak-raw-key"}}"#)
            .create_async()
            .await;

        let key = get_ark_api_key("AK", "SK", options_for(&server))
            .await
            .unwrap();

        assert_eq!(key, "ak-raw-key");
        list_mock.assert_async().await;
        raw_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_key_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_query(mockito::Matcher::UrlEncoded(
                "Action".into(),
                "ListApiKeys".into(),
            ))
            .with_status(200)
            .with_body(r#"{"ResponseMetadata": {}, "Result": {"Items": []}}"#)
            .create_async()
            .await;

        let err = get_ark_api_key("AK", "SK", options_for(&server))
            .await
            .unwrap_err();

        assert!(matches!(err, VeauthError::EmptyKeyList));
    }

    #[tokio::test]
    async fn test_missing_raw_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_query(mockito::Matcher::UrlEncoded(
                "Action".into(),
                "ListApiKeys".into(),
            ))
            .with_status(200)
            .with_body(r#"{"ResponseMetadata": {}, "Result": {"Items": [{"Id": 7}]}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_query(mockito::Matcher::UrlEncoded(
                "Action".into(),
                "GetRawApiKey".into(),
            ))
            .with_status(200)
            .with_body(r#"{"ResponseMetadata": {}, "Result": {}}"#)
            .create_async()
            .await;

        let err = get_ark_api_key("AK", "SK", options_for(&server))
            .await
            .unwrap_err();

        assert!(matches!(err, VeauthError::MissingApiKey));
    }

    #[tokio::test]
    async fn test_api_error_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_query(mockito::Matcher::UrlEncoded(
                "Action".into(),
                "ListApiKeys".into(),
            ))
            .with_status(403)
            .with_body(
                r#"{"ResponseMetadata": {"Error": {"Code": "AccessDenied", "Message": "no"}}}"#,
            )
            .create_async()
            .await;

        let err = get_ark_api_key("AK", "SK", options_for(&server))
            .await
            .unwrap_err();

        match err {
            VeauthError::Api { code, .. } => assert_eq!(code, "AccessDenied"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
