//! Deterministic virtual → physical name encoding.
//!
//! Plain form: `{name}-x-{namespace}-x-{suffix}`. When the plain form would
//! exceed a DNS-1123 label, or a component could shift the `-x-` separators,
//! the name is a 52 char prefix plus 10 hex chars of a sha256 over the
//! `/`-joined components (which cannot appear in Kubernetes names).

use sha2::{Digest, Sha256};

use vsync_core::ObjectKey;

pub const MAX_NAME_LEN: usize = 63;
const HASH_PREFIX_LEN: usize = 52;
const HASH_LEN: usize = 10;
const SEP: &str = "x";
const CLUSTER_PREFIX: &str = "vsync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTranslator {
    suffix: String,
}

impl NameTranslator {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self { suffix: suffix.into() }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Host name for a namespaced virtual object.
    pub fn physical_name(&self, name: &str, virtual_namespace: &str) -> String {
        let ambiguous = is_ambiguous(name) || is_ambiguous(virtual_namespace);
        safe_concat(&[name, SEP, virtual_namespace, SEP, &self.suffix], ambiguous)
    }

    /// Host name for a cluster-scoped virtual object; the target namespace stands
    /// in for the missing namespace so virtual clusters sharing a host never collide.
    pub fn physical_name_cluster_scoped(&self, name: &str, target_namespace: &str) -> String {
        let ambiguous = is_ambiguous(name) || is_ambiguous(target_namespace);
        safe_concat(&[CLUSTER_PREFIX, name, SEP, target_namespace, SEP, &self.suffix], ambiguous)
    }

    /// Physical key of a virtual key.
    pub fn physical_key(&self, key: &ObjectKey, target_namespace: &str) -> ObjectKey {
        match key.namespace() {
            Some(ns) => ObjectKey::new(target_namespace, self.physical_name(&key.name, ns)),
            None => ObjectKey::cluster(self.physical_name_cluster_scoped(&key.name, target_namespace)),
        }
    }
}

// A component that begins or ends at an `x` boundary, or embeds `-x-`, could be
// read as part of a different split.
fn is_ambiguous(part: &str) -> bool {
    part == SEP || part.starts_with("x-") || part.ends_with("-x") || part.contains("-x-")
}

fn safe_concat(parts: &[&str], force_hash: bool) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LEN && !force_hash {
        return full;
    }
    let digest = Sha256::digest(parts.join("/").as_bytes());
    let hash = hex::encode(digest);
    let prefix: String = full.chars().take(HASH_PREFIX_LEN).collect();
    let prefix = prefix.trim_end_matches(['-', '.']);
    format!("{}-{}", prefix, &hash[..HASH_LEN]).replace(".-", "-")
}
