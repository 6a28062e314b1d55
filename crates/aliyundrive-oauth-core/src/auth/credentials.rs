use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::ClientCredentials;

/// Attaches the service's client identity to payloads bound for the upstream provider.
#[derive(Debug, Clone)]
pub struct CredentialInjector {
    credentials: Arc<ClientCredentials>,
}

impl CredentialInjector {
    pub fn new(credentials: ClientCredentials) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }

    pub fn client_id(&self) -> &str {
        self.credentials.client_id()
    }

    /// Return a copy of `payload` with `client_id` and `client_secret` overwritten.
    pub fn inject(&self, payload: &Map<String, Value>) -> Map<String, Value> {
        let mut injected = payload.clone();
        injected.insert(
            "client_id".to_owned(),
            Value::String(self.credentials.client_id().to_owned()),
        );
        injected.insert(
            "client_secret".to_owned(),
            Value::String(self.credentials.client_secret().to_owned()),
        );
        injected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overwrites_caller_supplied_credentials() {
        let injector = CredentialInjector::new(ClientCredentials::new("real-id", "real-secret"));
        let payload = json!({
            "client_id": "spoofed",
            "client_secret": "spoofed",
            "grant_type": "authorization_code",
            "code": "abc",
        });
        let injected = injector.inject(payload.as_object().unwrap());

        assert_eq!(injected["client_id"], "real-id");
        assert_eq!(injected["client_secret"], "real-secret");
        assert_eq!(injected["grant_type"], "authorization_code");
        assert_eq!(injected["code"], "abc");
    }

    #[test]
    fn leaves_input_untouched() {
        let injector = CredentialInjector::new(ClientCredentials::new("id", "secret"));
        let payload = json!({ "scopes": ["user:base"] });
        let original = payload.as_object().unwrap().clone();
        let injected = injector.inject(&original);

        assert!(!original.contains_key("client_id"));
        assert_eq!(injected.len(), 3);
    }
}
