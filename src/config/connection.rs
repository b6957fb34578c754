//! Connection string parsing.
//!
//! SQL Server connection strings are `key=value` pairs separated by `;`.
//! Only the data source and database are interpreted: together they key the
//! live-schema cache and identify a physical database for transaction
//! consolidation.

use std::collections::BTreeMap;

/// Error type for connection strings.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConnectionError {
    #[error("Malformed connection string segment: {0}")]
    Malformed(String),
}

/// Parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Server (data source); empty when not given.
    pub data_source: String,
    /// Database (initial catalog); empty when not given.
    pub database: String,
    /// All pairs, keys lower-cased.
    pub options: BTreeMap<String, String>,
}

impl ConnectionInfo {
    /// Parse a `key=value;key=value` connection string.
    pub fn parse(s: &str) -> Result<Self, ConnectionError> {
        let mut options = BTreeMap::new();

        for segment in s.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionError::Malformed(segment.to_string()))?;
            options.insert(key.trim().to_lowercase(), value.trim().to_string());
        }

        let lookup = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| options.get(*k).cloned())
                .unwrap_or_default()
        };

        Ok(Self {
            data_source: lookup(&["server", "data source", "address", "addr"]),
            database: lookup(&["database", "initial catalog"]),
            options,
        })
    }

    /// Cache key for catalog lookups: (data source, database), case-folded.
    pub fn catalog_key(&self) -> (String, String) {
        (self.data_source.to_lowercase(), self.database.to_lowercase())
    }
}
