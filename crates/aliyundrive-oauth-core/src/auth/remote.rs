use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::proxy::default_http_client;
use super::{AuthError, AuthorizationRequest, QrCodeRequest, RawResponse};
use crate::config::UpstreamEndpoints;

/// Client for an already deployed authorization proxy.
///
/// The proxy holds the client credentials, so nothing secret leaves this process.
/// QR status polling still goes straight to the upstream provider.
#[derive(Debug, Clone)]
pub struct RemoteProxy {
    http: Client,
    proxy: UpstreamEndpoints,
    upstream: UpstreamEndpoints,
}

impl RemoteProxy {
    pub fn new(proxy: UpstreamEndpoints, upstream: UpstreamEndpoints) -> Result<Self, AuthError> {
        Ok(Self::with_client(default_http_client()?, proxy, upstream))
    }

    pub fn with_client(
        http: Client,
        proxy: UpstreamEndpoints,
        upstream: UpstreamEndpoints,
    ) -> Self {
        Self {
            http,
            proxy,
            upstream,
        }
    }

    pub fn base_url(&self) -> &Url {
        self.proxy.base_url()
    }

    pub fn upstream(&self) -> &UpstreamEndpoints {
        &self.upstream
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub async fn qrcode(&self, request: &QrCodeRequest) -> Result<RawResponse, AuthError> {
        let url = self.proxy.qrcode_url()?;
        self.post(url, request).await
    }

    pub async fn access_token(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<RawResponse, AuthError> {
        request.validate()?;
        let url = self.proxy.access_token_url()?;
        self.post(url, request).await
    }

    async fn post<T: Serialize>(&self, url: Url, body: &T) -> Result<RawResponse, AuthError> {
        debug!(url = %url, "forwarding to authorization proxy");
        let response = self.http.post(url).json(body).send().await?;
        RawResponse::read(response).await
    }
}
