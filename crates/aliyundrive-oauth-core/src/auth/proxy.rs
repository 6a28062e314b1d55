use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use super::{AuthError, CredentialInjector};
use crate::config::{ClientCredentials, UpstreamEndpoints};

pub const DEFAULT_SCOPES: &[&str; 3] = &["user:base", "file:all:read", "file:all:write"];
pub const DEFAULT_QRCODE_SIZE: u32 = 300;

const DEFAULT_USER_AGENT: &str = concat!("aliyundrive-oauth/", env!("CARGO_PKG_VERSION"));
const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Build the pooled HTTP client shared by every upstream call in the process.
pub fn default_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .pool_idle_timeout(Duration::from_secs(50))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
}

/// Upstream reply relayed without interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: String,
}

impl RawResponse {
    pub fn new(
        status: StatusCode,
        body: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    pub(crate) async fn read(response: reqwest::Response) -> Result<Self, AuthError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_owned();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            body,
            content_type,
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Body of `POST /oauth/authorize/qrcode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCodeRequest {
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl QrCodeRequest {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            width: None,
            height: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SCOPES.iter().copied())
            .with_size(DEFAULT_QRCODE_SIZE, DEFAULT_QRCODE_SIZE)
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    /// Any other grant; forwarded as-is for the upstream to judge.
    #[serde(untagged)]
    Other(String),
}

/// Body of `POST /oauth/access_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub grant_type: GrantType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl AuthorizationRequest {
    pub fn authorization_code<S: Into<String>>(code: S) -> Self {
        Self {
            grant_type: GrantType::AuthorizationCode,
            code: Some(code.into()),
            refresh_token: None,
        }
    }

    pub fn refresh_token<S: Into<String>>(refresh_token: S) -> Self {
        Self {
            grant_type: GrantType::RefreshToken,
            code: None,
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// Reject requests that cannot succeed upstream.
    ///
    /// Only the refresh grant is checked; an authorization code grant is forwarded
    /// even when `code` is absent and the upstream decides.
    pub fn validate(&self) -> Result<(), AuthError> {
        let has_refresh_token = self
            .refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty());
        if self.grant_type == GrantType::RefreshToken && !has_refresh_token {
            return Err(AuthError::Validation("refresh token required".into()));
        }
        Ok(())
    }
}

/// Forwards authorization requests to the upstream provider with the service's
/// client credentials attached, relaying replies verbatim.
#[derive(Debug, Clone)]
pub struct AuthProxy {
    http: Client,
    injector: CredentialInjector,
    endpoints: UpstreamEndpoints,
}

impl AuthProxy {
    pub fn new(credentials: ClientCredentials) -> Result<Self, AuthError> {
        Self::with_endpoints(credentials, UpstreamEndpoints::default())
    }

    pub fn with_endpoints(
        credentials: ClientCredentials,
        endpoints: UpstreamEndpoints,
    ) -> Result<Self, AuthError> {
        Ok(Self::with_client(
            default_http_client()?,
            credentials,
            endpoints,
        ))
    }

    pub fn with_client(
        http: Client,
        credentials: ClientCredentials,
        endpoints: UpstreamEndpoints,
    ) -> Self {
        Self {
            http,
            injector: CredentialInjector::new(credentials),
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &UpstreamEndpoints {
        &self.endpoints
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Request a new QR login from the upstream provider.
    pub async fn qrcode(&self, request: &QrCodeRequest) -> Result<RawResponse, AuthError> {
        let url = self.endpoints.qrcode_url()?;
        self.forward(url, request).await
    }

    /// Exchange an authorization code or refresh token upstream.
    ///
    /// A refresh grant without a refresh token fails with [`AuthError::Validation`]
    /// before any outbound call.
    pub async fn access_token(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<RawResponse, AuthError> {
        request.validate()?;
        let url = self.endpoints.access_token_url()?;
        self.forward(url, request).await
    }

    async fn forward<T: Serialize>(&self, url: Url, payload: &T) -> Result<RawResponse, AuthError> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            other => {
                return Err(AuthError::Validation(format!(
                    "request body must be a JSON object, got {other}"
                )))
            }
        };
        let body: Map<String, Value> = self.injector.inject(&payload);

        debug!(url = %url, client_id = self.injector.client_id(), "forwarding upstream");
        let response = self
            .http
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                warn!(url = %url, error = %err, "upstream request failed");
                AuthError::Http(err)
            })?;

        let raw = RawResponse::read(response).await?;
        debug!(url = %url, status = %raw.status, "upstream replied");
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn proxy_for(server: &MockServer) -> AuthProxy {
        let endpoints = UpstreamEndpoints::new(&server.base_url()).unwrap();
        AuthProxy::with_endpoints(ClientCredentials::new("client", "secret"), endpoints).unwrap()
    }

    #[tokio::test]
    async fn qrcode_injects_credentials_and_relays_verbatim() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/authorize/qrcode")
                    .json_body(json!({
                        "client_id": "client",
                        "client_secret": "secret",
                        "scopes": ["user:base"],
                        "width": 300,
                        "height": 300,
                    }));
                then.status(201)
                    .header("content-type", "application/vnd.custom+json")
                    .body(r#"{"qrCodeUrl":"https://example.com/qr","sid":"s1","future":true}"#);
            })
            .await;

        let proxy = proxy_for(&server);
        let raw = proxy
            .qrcode(&QrCodeRequest::new(["user:base"]).with_size(300, 300))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(raw.status, StatusCode::CREATED);
        assert_eq!(raw.content_type, "application/vnd.custom+json");
        assert_eq!(
            raw.text(),
            r#"{"qrCodeUrl":"https://example.com/qr","sid":"s1","future":true}"#
        );
    }

    #[tokio::test]
    async fn qrcode_is_never_deduplicated() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/authorize/qrcode");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"qrCodeUrl":"https://example.com/qr","sid":"s"}"#);
            })
            .await;

        let proxy = proxy_for(&server);
        let request = QrCodeRequest::with_defaults();
        proxy.qrcode(&request).await.unwrap();
        proxy.qrcode(&request).await.unwrap();

        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn upstream_error_status_is_relayed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/access_token");
                then.status(400)
                    .header("content-type", "application/json")
                    .body(r#"{"code":"InvalidCode","message":"bad"}"#);
            })
            .await;

        let proxy = proxy_for(&server);
        let raw = proxy
            .access_token(&AuthorizationRequest::authorization_code("bad"))
            .await
            .unwrap();
        assert_eq!(raw.status, StatusCode::BAD_REQUEST);
        assert_eq!(raw.text(), r#"{"code":"InvalidCode","message":"bad"}"#);
    }

    #[tokio::test]
    async fn refresh_grant_without_token_is_rejected_locally() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth/access_token");
                then.status(200).body("{}");
            })
            .await;

        let proxy = proxy_for(&server);
        let request = AuthorizationRequest {
            grant_type: GrantType::RefreshToken,
            code: None,
            refresh_token: None,
        };
        let err = proxy.access_token(&request).await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(err.to_string(), "refresh token required");
        mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn refresh_grant_forwards_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/access_token")
                    .json_body(json!({
                        "client_id": "client",
                        "client_secret": "secret",
                        "grant_type": "refresh_token",
                        "refresh_token": "rt-1",
                    }));
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"refresh_token":"rt-2","access_token":"at"}"#);
            })
            .await;

        let proxy = proxy_for(&server);
        let raw = proxy
            .access_token(&AuthorizationRequest::refresh_token("rt-1"))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(raw.status, StatusCode::OK);
    }

    #[test]
    fn authorization_code_grant_without_code_is_forwarded() {
        let request = AuthorizationRequest {
            grant_type: GrantType::AuthorizationCode,
            code: None,
            refresh_token: None,
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn unknown_grant_type_round_trips() {
        let request: AuthorizationRequest =
            serde_json::from_str(r#"{"grant_type":"client_credentials"}"#).unwrap();
        assert_eq!(
            request.grant_type,
            GrantType::Other("client_credentials".into())
        );
        assert!(request.validate().is_ok());
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "grant_type": "client_credentials" })
        );
    }

    #[test]
    fn grant_type_wire_format() {
        let request: AuthorizationRequest =
            serde_json::from_str(r#"{"grant_type":"authorization_code","code":"abc"}"#).unwrap();
        assert_eq!(request, AuthorizationRequest::authorization_code("abc"));
    }
}
