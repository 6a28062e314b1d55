use std::env;
use std::fmt;

use thiserror::Error;
use url::Url;

pub const CLIENT_ID_ENV: &str = "ALIYUNDRIVE_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "ALIYUNDRIVE_CLIENT_SECRET";
pub const DEFAULT_UPSTREAM_URL: &str = "https://openapi.aliyundrive.com";
pub const DEFAULT_PROXY_URL: &str = "https://aliyundrive-oauth.messense.me";

/// Client identity registered with the Aliyun Drive open platform.
///
/// Loaded once at startup and shared read-only afterwards. `Debug` redacts the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    pub fn new<I, S>(client_id: I, client_secret: S) -> Self
    where
        I: Into<String>,
        S: Into<String>,
    {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Read both credentials from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`ClientCredentials::from_env`], returning `None` when neither variable is set.
    ///
    /// Setting only one of the two is still a configuration error.
    pub fn from_env_optional() -> Result<Option<Self>, ConfigError> {
        Self::optional_from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_id = non_blank(lookup(CLIENT_ID_ENV))
            .ok_or(ConfigError::MissingVariable(CLIENT_ID_ENV))?;
        let client_secret = non_blank(lookup(CLIENT_SECRET_ENV))
            .ok_or(ConfigError::MissingVariable(CLIENT_SECRET_ENV))?;
        Ok(Self::new(client_id, client_secret))
    }

    pub fn optional_from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match (
            non_blank(lookup(CLIENT_ID_ENV)),
            non_blank(lookup(CLIENT_SECRET_ENV)),
        ) {
            (Some(id), Some(secret)) => Ok(Some(Self::new(id, secret))),
            (None, None) => Ok(None),
            _ => Err(ConfigError::PartialCredentials),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Endpoints of the upstream OAuth provider.
#[derive(Debug, Clone)]
pub struct UpstreamEndpoints {
    base_url: Url,
}

impl UpstreamEndpoints {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|err| ConfigError::InvalidUrl(base_url.to_owned(), err))?;
        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn qrcode_url(&self) -> Result<Url, url::ParseError> {
        self.join("oauth/authorize/qrcode")
    }

    pub fn access_token_url(&self) -> Result<Url, url::ParseError> {
        self.join("oauth/access_token")
    }

    pub fn qrcode_status_url(&self, sid: &str) -> Result<Url, url::ParseError> {
        let mut url = self.join("oauth/qrcode")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .push(sid)
            .push("status");
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
    }
}

impl Default for UpstreamEndpoints {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_UPSTREAM_URL).expect("valid default upstream URL"),
        }
    }
}

/// Errors detected while assembling process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is required")]
    MissingVariable(&'static str),
    #[error("ALIYUNDRIVE_CLIENT_ID and ALIYUNDRIVE_CLIENT_SECRET must be set together")]
    PartialCredentials,
    #[error("invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] url::ParseError),
}
