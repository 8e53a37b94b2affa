//! Where policies come from.
//!
//! `RemotePolicySource` pulls the authority's full list over a `Transport`.
//! `BundlePolicySource` serves a fixed list loaded from a TOML bundle, for
//! hosts with no route to the authority.
//!
//! Bundle format:
//! ```toml
//! [[policies]]
//! id = "block-evil"
//! source = '''
//! forbid (principal, action == Action::"http", resource)
//!   when { request.hostname == "evil.com" };
//! '''
//! enabled = true
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use tollgate_contracts::{
    error::{TollgateError, TollgateResult},
    policy::Policy,
};
use tollgate_core::traits::{PolicySource, Transport};

/// Path of the policy listing, relative to the transport's base URL.
pub const POLICIES_PATH: &str = "/policies";

#[derive(Debug, Deserialize)]
struct PolicyList {
    #[serde(default)]
    policies: Vec<Policy>,
}

/// Fetches `GET /policies` from the policy authority.
pub struct RemotePolicySource {
    transport: Arc<dyn Transport>,
}

impl RemotePolicySource {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl PolicySource for RemotePolicySource {
    fn fetch_policies(&self) -> TollgateResult<Vec<Policy>> {
        let body = self
            .transport
            .get_json(POLICIES_PATH)
            .map_err(|e| TollgateError::Fetch { reason: e.to_string() })?;

        let list: PolicyList = serde_json::from_value(body).map_err(|e| TollgateError::Fetch {
            reason: format!("malformed policy list: {}", e),
        })?;
        Ok(list.policies)
    }
}

/// A fixed policy list, typically loaded from a TOML bundle file.
#[derive(Debug, Clone, Default)]
pub struct BundlePolicySource {
    policies: Vec<Policy>,
}

impl BundlePolicySource {
    pub fn new(policies: Vec<Policy>) -> Self {
        Self { policies }
    }

    /// Parse `s` as a TOML policy bundle.
    ///
    /// Returns `TollgateError::Config` if the TOML is malformed or a policy
    /// entry is missing `id` or `source`.
    pub fn from_toml_str(s: &str) -> TollgateResult<Self> {
        let list: PolicyList = toml::from_str(s)
            .map_err(|e| TollgateError::config(format!("failed to parse policy bundle: {}", e)))?;
        Ok(Self::new(list.policies))
    }

    /// Read the file at `path` and parse it as a policy bundle.
    pub fn from_file(path: &Path) -> TollgateResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TollgateError::config(format!(
                "failed to read policy bundle '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }
}

impl PolicySource for BundlePolicySource {
    fn fetch_policies(&self) -> TollgateResult<Vec<Policy>> {
        Ok(self.policies.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::{json, Value};

    use super::*;

    /// A transport that serves one canned GET body and records paths.
    struct CannedTransport {
        body: TollgateResult<Value>,
        paths: Mutex<Vec<String>>,
    }

    impl Transport for CannedTransport {
        fn base_url(&self) -> &str {
            "http://localhost:8080/api/v1"
        }

        fn get_json(&self, path: &str) -> TollgateResult<Value> {
            self.paths.lock().unwrap().push(path.to_string());
            self.body.clone()
        }

        fn post_json(&self, _path: &str, _body: &Value) -> TollgateResult<Value> {
            unreachable!("policy source never posts")
        }
    }

    fn remote(body: TollgateResult<Value>) -> (RemotePolicySource, Arc<CannedTransport>) {
        let transport = Arc::new(CannedTransport { body, paths: Mutex::new(Vec::new()) });
        (RemotePolicySource::new(transport.clone()), transport)
    }

    #[test]
    fn remote_source_reads_policy_list() {
        let (source, transport) = remote(Ok(json!({
            "policies": [
                {"id": "p1", "cedar_dsl": "forbid (principal, action, resource);", "enabled": true},
                {"id": "p2", "cedar_dsl": "forbid (principal, action, resource);", "enabled": false}
            ]
        })));
        let policies = source.fetch_policies().unwrap();
        assert_eq!(policies.len(), 2);
        assert!(!policies[1].enabled);
        assert_eq!(transport.paths.lock().unwrap().as_slice(), ["/policies"]);
    }

    #[test]
    fn remote_source_maps_transport_failure_to_fetch_error() {
        let (source, _) = remote(Err(TollgateError::transport("connection refused")));
        let err = source.fetch_policies().unwrap_err();
        assert!(matches!(err, TollgateError::Fetch { .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn remote_source_rejects_malformed_body() {
        let (source, _) = remote(Ok(json!({"policies": [{"id": 7}]})));
        assert!(matches!(source.fetch_policies(), Err(TollgateError::Fetch { .. })));
    }

    #[test]
    fn bundle_parses_source_alias() {
        let bundle = BundlePolicySource::from_toml_str(
            r#"
            [[policies]]
            id = "block-evil"
            source = 'forbid (principal, action == Action::"http", resource) when { request.hostname == "evil.com" };'

            [[policies]]
            id = "off"
            source = "forbid (principal, action, resource);"
            enabled = false
            "#,
        )
        .unwrap();
        let policies = bundle.fetch_policies().unwrap();
        assert_eq!(policies.len(), 2);
        assert!(policies[0].enabled);
        assert!(!policies[1].enabled);
    }

    #[test]
    fn bundle_rejects_missing_source() {
        let err = BundlePolicySource::from_toml_str("[[policies]]\nid = \"x\"\n").unwrap_err();
        assert!(matches!(err, TollgateError::Config { .. }));
    }

    #[test]
    fn bundle_from_missing_file_is_config_error() {
        let err = BundlePolicySource::from_file(Path::new("/nonexistent/bundle.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read policy bundle"));
    }
}
