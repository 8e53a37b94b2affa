//! Authenticated JSON transport over `reqwest::blocking`.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use tollgate_contracts::{
    config::{user_agent, ClientConfig},
    error::{TollgateError, TollgateResult},
};
use tollgate_core::traits::Transport;

/// HTTP client for the Tollgate backend.
///
/// Every request carries `Authorization: Bearer <key>`, the SDK user agent
/// and `Content-Type: application/json`. After `close()` every call fails
/// with `TollgateError::ClientClosed`.
pub struct ApiClient {
    base_url: String,
    client: Mutex<Option<Client>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> TollgateResult<Self> {
        Self::with_credentials(&config.base_url, &config.api_key, config.timeout)
    }

    pub fn with_credentials(base_url: &str, api_key: &str, timeout: Duration) -> TollgateResult<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| TollgateError::config("API key is not a valid header value"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .default_headers(headers)
            .build()
            .map_err(|e| TollgateError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Mutex::new(Some(client)),
        })
    }

    fn client(&self) -> TollgateResult<Client> {
        // `Client` is a cheap handle around a shared pool.
        self.client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(TollgateError::ClientClosed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn read_json(response: reqwest::blocking::Response) -> TollgateResult<Value> {
    let response = response
        .error_for_status()
        .map_err(|e| TollgateError::transport(e.to_string()))?;
    let text = response
        .text()
        .map_err(|e| TollgateError::transport(format!("failed to read response body: {}", e)))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| TollgateError::transport(format!("invalid JSON response: {}", e)))
}

impl Transport for ApiClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_json(&self, path: &str) -> TollgateResult<Value> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self
            .client()?
            .get(&url)
            .send()
            .map_err(|e| TollgateError::transport(e.to_string()))?;
        read_json(response)
    }

    fn post_json(&self, path: &str, body: &Value) -> TollgateResult<Value> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self
            .client()?
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| TollgateError::transport(e.to_string()))?;
        read_json(response)
    }

    fn close(&self) {
        if self.client.lock().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            debug!(base_url = %self.base_url, "HTTP client released");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn client() -> ApiClient {
        ApiClient::with_credentials("http://127.0.0.1:9/api/v1/", "tgk_test", Duration::from_millis(200)).unwrap()
    }

    #[test]
    fn base_url_has_no_trailing_slash() {
        let api = client();
        assert_eq!(api.base_url(), "http://127.0.0.1:9/api/v1");
        assert_eq!(api.url("/policies"), "http://127.0.0.1:9/api/v1/policies");
    }

    #[test]
    fn closed_client_refuses_requests() {
        let api = client();
        api.close();
        api.close();
        assert!(matches!(api.get_json("/policies"), Err(TollgateError::ClientClosed)));
        assert!(matches!(api.post_json("/agents", &json!({})), Err(TollgateError::ClientClosed)));
    }

    #[test]
    fn unreachable_backend_is_transport_error() {
        let api = client();
        assert!(matches!(api.get_json("/policies"), Err(TollgateError::Transport { .. })));
    }

    #[test]
    fn header_unsafe_key_is_rejected() {
        let err = ApiClient::with_credentials("https://x", "tgk_\nbad", Duration::from_secs(1)).err();
        assert!(matches!(err, Some(TollgateError::Config { .. })));
    }
}
