use std::future::Future;

use reqwest::Client;
use tracing::warn;

use super::{
    AuthError, AuthProxy, AuthorizationRequest, QrCodeRequest, QrStatus, RawResponse, RemoteProxy,
};
use crate::config::UpstreamEndpoints;

/// Remote operations a login session depends on.
///
/// Implemented by [`AuthProxy`] (credentials held locally), [`RemoteProxy`]
/// (credentials held by a deployed proxy), and by scripted fakes in tests.
pub trait AuthorizationApi: Send + Sync {
    /// `POST /oauth/authorize/qrcode`.
    fn request_qrcode(
        &self,
        request: &QrCodeRequest,
    ) -> impl Future<Output = Result<RawResponse, AuthError>> + Send;

    /// `POST /oauth/access_token`.
    fn request_token(
        &self,
        request: &AuthorizationRequest,
    ) -> impl Future<Output = Result<RawResponse, AuthError>> + Send;

    /// `GET /oauth/qrcode/{sid}/status`.
    ///
    /// A request that never completes must surface as [`AuthError::PollTimedOut`].
    fn qrcode_status(&self, sid: &str) -> impl Future<Output = Result<QrStatus, AuthError>> + Send;
}

impl AuthorizationApi for AuthProxy {
    async fn request_qrcode(&self, request: &QrCodeRequest) -> Result<RawResponse, AuthError> {
        self.qrcode(request).await
    }

    async fn request_token(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<RawResponse, AuthError> {
        self.access_token(request).await
    }

    async fn qrcode_status(&self, sid: &str) -> Result<QrStatus, AuthError> {
        fetch_qrcode_status(self.http(), self.endpoints(), sid).await
    }
}

impl AuthorizationApi for RemoteProxy {
    async fn request_qrcode(&self, request: &QrCodeRequest) -> Result<RawResponse, AuthError> {
        self.qrcode(request).await
    }

    async fn request_token(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<RawResponse, AuthError> {
        self.access_token(request).await
    }

    async fn qrcode_status(&self, sid: &str) -> Result<QrStatus, AuthError> {
        fetch_qrcode_status(self.http(), self.upstream(), sid).await
    }
}

/// Either a local [`AuthProxy`] or a [`RemoteProxy`], picked at startup.
#[derive(Debug, Clone)]
pub enum AuthorizationBackend {
    Direct(AuthProxy),
    Remote(RemoteProxy),
}

impl AuthorizationBackend {
    pub fn describe(&self) -> String {
        match self {
            AuthorizationBackend::Direct(proxy) => {
                format!("upstream {}", proxy.endpoints().base_url())
            }
            AuthorizationBackend::Remote(remote) => format!("proxy {}", remote.base_url()),
        }
    }
}

impl AuthorizationApi for AuthorizationBackend {
    async fn request_qrcode(&self, request: &QrCodeRequest) -> Result<RawResponse, AuthError> {
        match self {
            AuthorizationBackend::Direct(proxy) => proxy.request_qrcode(request).await,
            AuthorizationBackend::Remote(remote) => remote.request_qrcode(request).await,
        }
    }

    async fn request_token(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<RawResponse, AuthError> {
        match self {
            AuthorizationBackend::Direct(proxy) => proxy.request_token(request).await,
            AuthorizationBackend::Remote(remote) => remote.request_token(request).await,
        }
    }

    async fn qrcode_status(&self, sid: &str) -> Result<QrStatus, AuthError> {
        match self {
            AuthorizationBackend::Direct(proxy) => proxy.qrcode_status(sid).await,
            AuthorizationBackend::Remote(remote) => remote.qrcode_status(sid).await,
        }
    }
}

/// Poll the upstream provider directly; the status endpoint needs no credentials.
pub(crate) async fn fetch_qrcode_status(
    http: &Client,
    endpoints: &UpstreamEndpoints,
    sid: &str,
) -> Result<QrStatus, AuthError> {
    let status_url = endpoints.qrcode_status_url(sid)?;
    let response = match http.get(status_url.clone()).send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() || err.is_connect() => {
            warn!(sid, error = %err, "qrcode status request did not complete");
            return Err(AuthError::PollTimedOut { status_url });
        }
        Err(err) => return Err(err.into()),
    };

    let raw = match RawResponse::read(response).await {
        Ok(raw) => raw,
        Err(AuthError::Http(err)) if err.is_timeout() => {
            return Err(AuthError::PollTimedOut { status_url });
        }
        Err(err) => return Err(err),
    };
    if !raw.status.is_success() {
        return Err(AuthError::UpstreamStatus {
            status: raw.status,
            body: raw.text(),
        });
    }
    QrStatus::from_body(&raw.body)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ClientCredentials;
    use httpmock::prelude::*;
    use reqwest::StatusCode;

    fn proxy_with_timeout(server: &MockServer, timeout: Duration) -> AuthProxy {
        let http = Client::builder().timeout(timeout).build().unwrap();
        AuthProxy::with_client(
            http,
            ClientCredentials::new("client", "secret"),
            UpstreamEndpoints::new(&server.base_url()).unwrap(),
        )
    }

    #[tokio::test]
    async fn status_is_fetched_without_credentials() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/oauth/qrcode/sid-1/status");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"status":"ScanSuccess"}"#);
            })
            .await;

        let proxy = proxy_with_timeout(&server, Duration::from_secs(5));
        let status = proxy.qrcode_status("sid-1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(status, QrStatus::ScanSuccess);
    }

    #[tokio::test]
    async fn slow_status_request_is_a_poll_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/oauth/qrcode/slow/status");
                then.status(200)
                    .delay(Duration::from_millis(800))
                    .body(r#"{"status":"WaitLogin"}"#);
            })
            .await;

        let proxy = proxy_with_timeout(&server, Duration::from_millis(100));
        let err = proxy.qrcode_status("slow").await.unwrap_err();

        match err {
            AuthError::PollTimedOut { status_url } => {
                assert!(status_url.as_str().ends_with("/oauth/qrcode/slow/status"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_status_connection_is_a_poll_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = AuthProxy::with_client(
            Client::builder().timeout(Duration::from_secs(5)).build().unwrap(),
            ClientCredentials::new("client", "secret"),
            UpstreamEndpoints::new(&format!("http://{addr}")).unwrap(),
        );
        let err = proxy.qrcode_status("refused").await.unwrap_err();

        match err {
            AuthError::PollTimedOut { status_url } => {
                assert_eq!(
                    status_url.as_str(),
                    format!("http://{addr}/oauth/qrcode/refused/status")
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_error_code_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/oauth/qrcode/gone/status");
                then.status(404).body(r#"{"code":"NotFound"}"#);
            })
            .await;

        let proxy = proxy_with_timeout(&server, Duration::from_secs(5));
        let err = proxy.qrcode_status("gone").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::UpstreamStatus { status, .. } if status == StatusCode::NOT_FOUND
        ));
    }
}
