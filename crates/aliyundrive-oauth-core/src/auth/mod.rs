mod api;
mod credentials;
mod error;
mod exchange;
mod flow;
mod proxy;
mod qrcode;
mod remote;
mod session;

pub use api::{AuthorizationApi, AuthorizationBackend};
pub use credentials::CredentialInjector;
pub use error::AuthError;
pub use exchange::{parse_code_input, CodeExchangeSession};
pub use flow::{InvalidFlow, LoginFlow, FLOW_ENV};
pub use proxy::{
    default_http_client, AuthProxy, AuthorizationRequest, GrantType, QrCodeRequest, RawResponse,
    DEFAULT_QRCODE_SIZE, DEFAULT_SCOPES,
};
pub use qrcode::{
    PollSettings, QrLoginHandle, QrLoginSession, QrLoginState, DEFAULT_POLL_INTERVAL,
};
pub use remote::RemoteProxy;
pub use session::{QrSession, QrStatus, TokenGrant};
