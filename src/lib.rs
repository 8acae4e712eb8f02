//! Durable cross-session memory for AI assistants.
//!
//! Facts, lifecycle events and session summaries are appended to JSON-lines
//! logs under a data directory. Those logs are the source of truth. A SQLite
//! index is projected from them incrementally and can be dropped and rebuilt at
//! any time.
//!
//! ```text
//! writers ──append──▶ journal (daily/*.jsonl, sessions.jsonl, MEMORY.md)
//!                        │                      │
//!                 IndexSyncer (cursor)     RecencySelector
//!                        ▼                      ▼
//!                  index.sqlite          session-start context
//!                        │
//!                  SearchEngine (BM25 + cosine, fused by RRF)
//! ```
//!
//! # Modules
//!
//! - [`journal`]: append-only logs, tolerant readers and the guarded destructive operations
//! - [`lock`]: cross-process file lock with a bounded wait
//! - [`db`]: index schema, connections and read-only introspection
//! - [`memory`]: chunking, index store, sync, search, recency selection and session lifecycle
//! - [`embedding`]: optional local ONNX embeddings; absence degrades search to keyword-only
//! - [`config`]: TOML configuration with environment overrides
//! - [`cli`]: command implementations behind the `mneme` binary

pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod journal;
pub mod lock;
pub mod memory;

pub use error::{MemoryError, Result};
