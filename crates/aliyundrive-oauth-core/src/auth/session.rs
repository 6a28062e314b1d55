use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AuthError, RawResponse};

/// QR login attempt issued by the upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrSession {
    pub sid: String,
    pub qr_code_url: String,
}

impl QrSession {
    pub fn from_response(response: &RawResponse) -> Result<Self, AuthError> {
        if !response.status.is_success() {
            return Err(AuthError::UpstreamStatus {
                status: response.status,
                body: response.text(),
            });
        }
        let session: QrSession = serde_json::from_slice(&response.body)
            .map_err(|err| AuthError::MalformedResponse(format!("qrcode response: {err}")))?;
        if session.sid.is_empty() {
            return Err(AuthError::MalformedResponse(
                "qrcode response carries an empty sid".into(),
            ));
        }
        Ok(session)
    }
}

/// Status reported by a single poll of a QR login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrStatus {
    WaitLogin,
    ScanSuccess,
    LoginSuccess { auth_code: String },
    QrCodeExpired,
    /// A status value this client does not know; treated as still pending.
    Unknown(String),
}

impl QrStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QrStatus::LoginSuccess { .. } | QrStatus::QrCodeExpired)
    }

    pub fn as_str(&self) -> &str {
        match self {
            QrStatus::WaitLogin => "WaitLogin",
            QrStatus::ScanSuccess => "ScanSuccess",
            QrStatus::LoginSuccess { .. } => "LoginSuccess",
            QrStatus::QrCodeExpired => "QRCodeExpired",
            QrStatus::Unknown(other) => other,
        }
    }

    /// Decode the body of `GET /oauth/qrcode/{sid}/status`.
    pub fn from_body(body: &[u8]) -> Result<Self, AuthError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StatusPayload {
            status: String,
            auth_code: Option<String>,
        }

        let payload: StatusPayload = serde_json::from_slice(body)
            .map_err(|err| AuthError::MalformedResponse(format!("qrcode status: {err}")))?;

        let status = match payload.status.as_str() {
            "WaitLogin" => QrStatus::WaitLogin,
            "ScanSuccess" => QrStatus::ScanSuccess,
            "QRCodeExpired" => QrStatus::QrCodeExpired,
            "LoginSuccess" => {
                let auth_code = payload
                    .auth_code
                    .filter(|code| !code.is_empty())
                    .ok_or_else(|| {
                        AuthError::MalformedResponse("LoginSuccess without authCode".into())
                    })?;
                QrStatus::LoginSuccess { auth_code }
            }
            _ => QrStatus::Unknown(payload.status),
        };
        Ok(status)
    }
}

/// Tokens issued by a successful authorization code exchange.
#[derive(Debug, Clone, Serialize)]
pub struct TokenGrant {
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

impl TokenGrant {
    /// Interpret an `access_token` response.
    ///
    /// A body without a usable `refresh_token` means the upstream rejected the code,
    /// whatever status accompanied it.
    pub fn from_response(response: &RawResponse) -> Result<Self, AuthError> {
        let received_at = Utc::now();
        let payload: Value = serde_json::from_slice(&response.body).unwrap_or(Value::Null);

        let refresh_token = payload
            .get("refresh_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty());
        match refresh_token {
            Some(refresh_token) if response.status.is_success() => Ok(Self {
                refresh_token: refresh_token.to_owned(),
                access_token: string_field(&payload, "access_token"),
                token_type: string_field(&payload, "token_type"),
                expires_at: expires_in(&payload).and_then(|seconds| {
                    Duration::try_seconds(seconds)
                        .and_then(|lifetime| received_at.checked_add_signed(lifetime))
                }),
                received_at,
            }),
            _ => Err(AuthError::InvalidCode {
                status: response.status,
                message: describe_error(&payload).unwrap_or_else(|| response.text()),
            }),
        }
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_owned)
}

// Some deployments send `expires_in` as a string or a float.
fn expires_in(payload: &Value) -> Option<i64> {
    match payload.get("expires_in")? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|secs| secs.is_finite()).map(|secs| secs as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn describe_error(payload: &Value) -> Option<String> {
    let code = payload.get("code").filter(|code| !code.is_null());
    let message = payload.get("message").filter(|message| !message.is_null());
    match (code, message) {
        (Some(code), Some(message)) => Some(format!(
            "{}: {}",
            display_value(code),
            display_value(message)
        )),
        (None, Some(message)) => Some(display_value(message)),
        (Some(code), None) => Some(display_value(code)),
        (None, None) => None,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
