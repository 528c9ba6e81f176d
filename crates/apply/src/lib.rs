//! Ferry apply: manifest decoding and create/update/delete reconciliation.

#![forbid(unsafe_code)]

pub mod decode;
pub mod reconcile;

pub use decode::{DecodeLimits, ManifestDecoder};
pub use reconcile::{Applied, Reconciler};

/// Namespace assigned to manifests that do not name one.
pub const DEFAULT_NAMESPACE: &str = "default";
