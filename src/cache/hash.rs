//! Schema fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::schema::model::TableSchema;

/// SHA-256 of the JSON form of `value`, as lowercase hex.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(format!("{:x}", Sha256::digest(&json)))
}

/// Fingerprint of a table set; equal sets share generated statements.
pub fn fingerprint(tables: &[TableSchema]) -> Result<String, serde_json::Error> {
    compute_hash(&tables)
}
