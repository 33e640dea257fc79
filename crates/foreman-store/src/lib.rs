// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! SQLite persistence for the orchestration engine.
//!
//! Every entity the reconciler touches lives here: agents, models,
//! providers, tasks, messages, task summaries and API tokens.  The store is
//! deliberately thin — it maps rows, enforces the transactional boundaries
//! the step loop needs, and nothing else.  Traversals between entities go
//! through IDs; no in-memory object graph is ever built.

mod crypto;
mod error;
mod schema;
mod store;
mod types;

pub use crypto::{hash_token, SecretCipher};
pub use error::StoreError;
pub use store::{NewAgent, NewMessage, NewModel, NewProvider, NewTask, Store};
pub use types::{
    AgentRow, MessageBlock, MessageRow, MessageSource, ModelRow, ProviderRow, ProviderType,
    SummaryContent, TaskPhase, TaskRow, TaskSummaryRow, TokenRow, Usage,
};

pub type Result<T> = std::result::Result<T, StoreError>;
