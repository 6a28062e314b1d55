//! HTTP surface of the authorization proxy.

use std::future::Future;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::auth::{AuthError, AuthProxy, AuthorizationRequest, QrCodeRequest, RawResponse};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone)]
struct ProxyState {
    proxy: AuthProxy,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    app: &'static str,
    version: &'static str,
}

/// Routes `POST /oauth/authorize/qrcode`, `POST /oauth/access_token` and `GET /health`.
pub fn build_router(proxy: AuthProxy) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/oauth/authorize/qrcode", post(qrcode))
        .route("/oauth/access_token", post(access_token))
        .with_state(ProxyState { proxy })
}

/// Serve the proxy on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, proxy: AuthProxy, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, upstream = %proxy.endpoints().base_url(), "authorization proxy listening");
    }
    axum::serve(listener, build_router(proxy))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        app: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn qrcode(State(state): State<ProxyState>, Json(request): Json<QrCodeRequest>) -> Response {
    match state.proxy.qrcode(&request).await {
        Ok(raw) => {
            info!(status = %raw.status, scopes = request.scopes.len(), "relayed qrcode request");
            raw.into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn access_token(
    State(state): State<ProxyState>,
    Json(request): Json<AuthorizationRequest>,
) -> Response {
    match state.proxy.access_token(&request).await {
        Ok(raw) => {
            info!(
                status = %raw.status,
                grant_type = ?request.grant_type,
                "relayed access_token request"
            );
            raw.into_response()
        }
        Err(err) => error_response(err),
    }
}

impl IntoResponse for RawResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        let content_type = HeaderValue::from_str(&self.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/json"));
        response.headers_mut().insert(CONTENT_TYPE, content_type);
        response
    }
}

fn error_response(err: AuthError) -> Response {
    let status = match &err {
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::Http(inner) if inner.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    if status == StatusCode::BAD_REQUEST {
        info!(error = %err, "rejected request locally");
    } else {
        warn!(error = %err, %status, "upstream call failed");
    }
    (status, [(CONTENT_TYPE, TEXT_PLAIN)], err.to_string()).into_response()
}
