// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store: {entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("store: invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("store: secret cipher: {0}")]
    Crypto(String),

    #[error("store: serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store: sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// True for lookups that failed because the row does not exist, as
    /// opposed to infrastructure failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
