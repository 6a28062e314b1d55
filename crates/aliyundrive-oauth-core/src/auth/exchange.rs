use std::future::Future;

use tracing::{debug, info};
use url::Url;

use super::{AuthError, AuthorizationApi, AuthorizationRequest, TokenGrant};

/// One-shot exchange of a caller-supplied authorization code.
#[derive(Debug, Clone)]
pub struct CodeExchangeSession<A> {
    api: A,
}

impl<A> CodeExchangeSession<A>
where
    A: AuthorizationApi,
{
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// Exchange `code` for tokens; a rejected code yields [`AuthError::InvalidCode`].
    pub async fn exchange(&self, code: &str) -> Result<TokenGrant, AuthError> {
        exchange_code(&self.api, code).await
    }

    /// Read a code (or pasted redirect URL) from the caller and exchange it.
    pub async fn run<Input, Fut>(&self, mut read_input: Input) -> Result<TokenGrant, AuthError>
    where
        Input: FnMut() -> Fut,
        Fut: Future<Output = Result<String, AuthError>>,
    {
        let raw = read_input().await?;
        let code = parse_code_input(raw.trim())?;
        self.exchange(&code).await
    }
}

pub(crate) async fn exchange_code<A>(api: &A, code: &str) -> Result<TokenGrant, AuthError>
where
    A: AuthorizationApi,
{
    let request = AuthorizationRequest::authorization_code(code);
    let response = api.request_token(&request).await?;
    debug!(status = %response.status, "authorization code exchange replied");
    let grant = TokenGrant::from_response(&response)?;
    info!("authorization code exchanged for refresh token");
    Ok(grant)
}

/// Accept a bare authorization code or a redirect URL carrying `code=`.
pub fn parse_code_input(input: &str) -> Result<String, AuthError> {
    if input.is_empty() {
        return Err(AuthError::InvalidAuthorizationResponse(
            "empty input".into(),
        ));
    }

    if let Ok(url) = Url::parse(input) {
        let mut code: Option<String> = None;
        let mut error: Option<String> = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }
        if let Some(err) = error {
            return Err(AuthError::AccessDenied(err));
        }
        return code
            .filter(|code| !code.is_empty())
            .ok_or(AuthError::MissingAuthorizationCode);
    }

    Ok(input.to_owned())
}
