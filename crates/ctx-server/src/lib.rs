// crates/ctx-server/src/lib.rs
// ctx-sys - context engine for AI-assisted coding

#![allow(clippy::collapsible_if)]
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod analytics;
pub mod config;
pub mod conversations;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod identity;
pub mod indexer;
pub mod parser;
pub mod search;
pub mod service;
pub mod summarize;
pub mod utils;
pub mod watcher;

pub use error::{CtxError, Result};
