//! Manifest bytes → `ManifestObject`.

use serde::Deserialize;
use serde_json::Value as Json;

use ferry_core::{DecodeError, ManifestObject};

use crate::DEFAULT_NAMESPACE;

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(default)
}

/// Size and complexity budgets for a single manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl DecodeLimits {
    /// Budgets from `FERRY_MAX_MANIFEST_BYTES` / `FERRY_MAX_MANIFEST_NODES`,
    /// defaulting to 1 MiB and 100k nodes.
    pub fn from_env() -> Self {
        Self {
            max_bytes: env_usize("FERRY_MAX_MANIFEST_BYTES", 1_000_000),
            max_nodes: env_usize("FERRY_MAX_MANIFEST_NODES", 100_000),
        }
    }
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self { max_bytes: 1_000_000, max_nodes: 100_000 }
    }
}

/// True once the document holds more than `max` JSON nodes.
fn exceeds_node_budget(root: &Json, max: usize) -> bool {
    let mut pending = vec![root];
    let mut seen = 0usize;
    while let Some(v) = pending.pop() {
        seen += 1;
        if seen > max {
            return true;
        }
        match v {
            Json::Object(map) => pending.extend(map.values()),
            Json::Array(items) => pending.extend(items.iter()),
            _ => {}
        }
    }
    false
}

/// Decodes a single YAML or JSON resource document.
///
/// Decoding is pure: no network, no shared state. Fields are kept verbatim and
/// in source order, whether or not the kind is known to any local registry;
/// whether the cluster serves the kind is decided later by discovery.
#[derive(Debug, Clone)]
pub struct ManifestDecoder {
    default_namespace: String,
    limits: DecodeLimits,
}

impl Default for ManifestDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl ManifestDecoder {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self { default_namespace: default_namespace.into(), limits: DecodeLimits::default() }
    }

    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<ManifestObject, DecodeError> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DecodeError::Empty);
        }
        if bytes.len() > self.limits.max_bytes {
            return Err(DecodeError::TooLarge { size: bytes.len(), max: self.limits.max_bytes });
        }
        let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;

        let mut docs = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(text) {
            let val = serde_yaml::Value::deserialize(doc).map_err(|e| DecodeError::Syntax(e.to_string()))?;
            // Bare separators and comment-only documents carry nothing
            if !val.is_null() {
                docs.push(val);
            }
        }
        let val = match docs.len() {
            0 => return Err(DecodeError::Empty),
            1 => docs.remove(0),
            count => return Err(DecodeError::MultiDocument { count }),
        };

        let json = serde_json::to_value(val).map_err(|e| DecodeError::Convert(e.to_string()))?;
        if exceeds_node_budget(&json, self.limits.max_nodes) {
            return Err(DecodeError::TooComplex { max: self.limits.max_nodes });
        }
        let mut attributes = match json {
            Json::Object(map) => map,
            _ => return Err(DecodeError::NotAMapping),
        };

        let api_version = non_empty_str(attributes.get("apiVersion"))
            .ok_or(DecodeError::MissingApiVersion)?
            .to_string();
        let kind = non_empty_str(attributes.get("kind")).ok_or(DecodeError::MissingKind)?.to_string();
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version),
        };

        let meta = attributes
            .get_mut("metadata")
            .and_then(|m| m.as_object_mut())
            .ok_or(DecodeError::MissingName)?;
        let name = non_empty_str(meta.get("name")).ok_or(DecodeError::MissingName)?.to_string();
        let namespace = match non_empty_str(meta.get("namespace")) {
            Some(ns) => ns.to_string(),
            None => {
                meta.insert("namespace".into(), Json::String(self.default_namespace.clone()));
                self.default_namespace.clone()
            }
        };

        Ok(ManifestObject { group, version, kind, name, namespace, attributes })
    }
}

fn non_empty_str(v: Option<&Json>) -> Option<&str> {
    v.and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  labels:
    app: web
spec:
  replicas: 2
  x-unknown-field: kept
";

    #[test]
    fn missing_namespace_gets_default() {
        let obj = ManifestDecoder::default().decode(DEPLOYMENT.as_bytes()).unwrap();
        assert_eq!(obj.group, "apps");
        assert_eq!(obj.version, "v1");
        assert_eq!(obj.kind, "Deployment");
        assert_eq!(obj.name, "web");
        assert_eq!(obj.namespace, "default");
        assert_eq!(obj.attributes["metadata"]["namespace"], "default");
    }

    #[test]
    fn configured_default_namespace_is_used() {
        let obj = ManifestDecoder::new("gitops").decode(DEPLOYMENT.as_bytes()).unwrap();
        assert_eq!(obj.namespace, "gitops");
    }

    #[test]
    fn explicit_namespace_is_preserved() {
        let y = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: team-a\ndata:\n  k: v\n";
        let obj = ManifestDecoder::default().decode(y.as_bytes()).unwrap();
        assert_eq!(obj.group, "");
        assert_eq!(obj.namespace, "team-a");
        assert_eq!(obj.attributes["metadata"]["namespace"], "team-a");
    }

    #[test]
    fn empty_namespace_is_defaulted() {
        let y = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n  namespace: \"\"\n";
        let obj = ManifestDecoder::default().decode(y.as_bytes()).unwrap();
        assert_eq!(obj.namespace, "default");
    }

    #[test]
    fn unknown_fields_and_order_are_preserved() {
        let obj = ManifestDecoder::default().decode(DEPLOYMENT.as_bytes()).unwrap();
        let keys: Vec<_> = obj.attributes.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["apiVersion", "kind", "metadata", "spec"]);
        assert_eq!(obj.attributes["spec"]["x-unknown-field"], "kept");
    }

    #[test]
    fn json_documents_decode() {
        let j = br#"{"apiVersion":"example.com/v1alpha1","kind":"Widget","metadata":{"name":"w"},"spec":{"size":3}}"#;
        let obj = ManifestDecoder::default().decode(j).unwrap();
        assert_eq!(obj.gvk_key(), "example.com/v1alpha1/Widget");
        assert_eq!(obj.attributes["spec"]["size"], 3);
    }

    #[test]
    fn leading_separator_is_single_document() {
        let y = format!("---\n{}", DEPLOYMENT);
        assert!(ManifestDecoder::default().decode(y.as_bytes()).is_ok());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(ManifestDecoder::default().decode(b""), Err(DecodeError::Empty)));
        assert!(matches!(ManifestDecoder::default().decode(b"  \n"), Err(DecodeError::Empty)));
        assert!(matches!(ManifestDecoder::default().decode(b"# only a comment\n"), Err(DecodeError::Empty)));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let truncated = &br#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"na"#[..];
        assert!(matches!(ManifestDecoder::default().decode(truncated), Err(DecodeError::Syntax(_))));

        let cut = &DEPLOYMENT.as_bytes()[..30];
        assert!(ManifestDecoder::default().decode(cut).is_err());
    }

    #[test]
    fn multi_document_is_rejected() {
        let y = format!("{}---\n{}", DEPLOYMENT, DEPLOYMENT);
        let err = ManifestDecoder::default().decode(y.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::MultiDocument { count: 2 }), "err={}", err);
    }

    #[test]
    fn non_manifest_bytes_are_rejected() {
        assert!(matches!(ManifestDecoder::default().decode(b"- a\n- b\n"), Err(DecodeError::NotAMapping)));
        assert!(matches!(ManifestDecoder::default().decode(b"just words"), Err(DecodeError::NotAMapping)));
        assert!(matches!(ManifestDecoder::default().decode(&[0xff, 0xfe, 0x00]), Err(DecodeError::NotUtf8)));
    }

    #[test]
    fn missing_fields_are_friendly() {
        let e1 = ManifestDecoder::default().decode(b"kind: Foo\nmetadata:\n  name: x\n").unwrap_err().to_string();
        assert!(e1.contains("missing apiVersion"), "e1={}", e1);
        let e2 = ManifestDecoder::default().decode(b"apiVersion: v1\nmetadata:\n  name: x\n").unwrap_err().to_string();
        assert!(e2.contains("missing kind"), "e2={}", e2);
        let e3 = ManifestDecoder::default().decode(b"apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n").unwrap_err().to_string();
        assert!(e3.contains("missing metadata.name"), "e3={}", e3);
    }

    #[test]
    fn budgets_are_enforced() {
        let tight = ManifestDecoder::default().with_limits(DecodeLimits { max_bytes: 16, max_nodes: 100 });
        assert!(matches!(tight.decode(DEPLOYMENT.as_bytes()), Err(DecodeError::TooLarge { .. })));

        let shallow = ManifestDecoder::default().with_limits(DecodeLimits { max_bytes: 1_000_000, max_nodes: 5 });
        assert!(matches!(shallow.decode(DEPLOYMENT.as_bytes()), Err(DecodeError::TooComplex { max: 5 })));
    }

    #[test]
    fn node_budget_is_inclusive() {
        // root, apiVersion, kind, metadata, metadata.name
        let doc = br#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"x"}}"#;
        let at_limit = DecodeLimits { max_bytes: 1_000_000, max_nodes: 5 };
        assert!(ManifestDecoder::default().with_limits(at_limit).decode(doc).is_ok());
        let below = DecodeLimits { max_nodes: 4, ..at_limit };
        assert!(matches!(
            ManifestDecoder::default().with_limits(below).decode(doc),
            Err(DecodeError::TooComplex { max: 4 })
        ));
        assert!(!exceeds_node_budget(&serde_json::json!([1, [2, 3]]), 5));
        assert!(exceeds_node_budget(&serde_json::json!([1, [2, 3]]), 4));
    }
}
