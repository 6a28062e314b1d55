use std::env;

pub const FLOW_ENV: &str = "ALIYUNDRIVE_OAUTH_FLOW";

/// Ways a user can obtain a refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFlow {
    /// Scan a QR code with the mobile app.
    QrCode,
    /// Paste an authorization code obtained elsewhere.
    Code,
}

impl LoginFlow {
    /// Flow requested through the environment, falling back to QR code login.
    pub fn detect() -> Self {
        env::var(FLOW_ENV)
            .ok()
            .and_then(|value| value.parse::<LoginFlow>().ok())
            .unwrap_or(LoginFlow::QrCode)
    }
}

impl std::str::FromStr for LoginFlow {
    type Err = InvalidFlow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qrcode" | "qr" | "scan" => Ok(LoginFlow::QrCode),
            "code" | "manual" | "authorization-code" => Ok(LoginFlow::Code),
            other => Err(InvalidFlow(other.to_owned())),
        }
    }
}

impl std::fmt::Display for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            LoginFlow::QrCode => "qrcode",
            LoginFlow::Code => "code",
        };
        write!(f, "{value}")
    }
}

/// Error reported when parsing an unsupported flow.
#[derive(Debug, thiserror::Error)]
#[error("invalid login flow '{0}'")]
pub struct InvalidFlow(pub String);
