//! Canonical manifest encoding and hashing.
//!
//! The encoding is defined byte for byte so independent implementations
//! produce identical chains. Every field is written as
//! `<decimal byte length>:<bytes>;`, in this order: build id, project,
//! intent id, `created_at` (RFC 3339, microseconds, `Z`), file count, then
//! path, hash and decimal size for each file in ascending path order. A
//! file's `path` must equal its key in the manifest's file map.

use chrono::SecondsFormat;
use sha2::{Digest, Sha256};

use crate::models::EvidenceManifest;

/// Prior chain hash used for the first manifest of a project.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hex SHA-256 of artifact bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn canonical_bytes(manifest: &EvidenceManifest) -> Vec<u8> {
    let mut out = Vec::new();

    push_field(&mut out, manifest.build_id.as_bytes());
    push_field(&mut out, manifest.project.as_bytes());
    push_field(&mut out, manifest.intent_id.to_string().as_bytes());
    push_field(
        &mut out,
        manifest
            .created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true)
            .as_bytes(),
    );
    push_field(&mut out, manifest.files.len().to_string().as_bytes());

    // BTreeMap iteration is already sorted by path. The entry's own `path`
    // is encoded so the stored value is bound, not just its key.
    for file in manifest.files.values() {
        push_field(&mut out, file.path.as_bytes());
        push_field(&mut out, file.hash.as_bytes());
        push_field(&mut out, file.size.to_string().as_bytes());
    }

    out
}

/// `hex(SHA-256(canonical ∥ prior))`.
pub fn chain_hash(manifest: &EvidenceManifest, prior: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(manifest));
    hasher.update(prior.as_bytes());
    hex::encode(hasher.finalize())
}

fn push_field(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
    out.push(b';');
}
