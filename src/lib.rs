//! cbcc-engine: On-demand C/C++ semantic analysis
//!
//! This library powers editor features — code completion, go-to-declaration,
//! occurrence highlighting, call tips, diagnostics — by keeping expensive
//! translation-unit state alive between queries and a persistent cross-file
//! token index alongside it.
//!
//! # Architecture
//!
//! - [`proxy::AnalysisProxy`] — host-facing entry point; owns the unit pool,
//!   the token database and the event stream
//! - [`unit::AnalysisUnit`] — one parsed translation unit (opaque engine
//!   handle + include set + cached completion)
//! - [`worker::BackgroundWorker`] — single thread draining a FIFO job queue;
//!   all mutation is serialized through it
//! - [`database::TokenDatabase`] — persistent cross-file index of
//!   declarations with stable token ids
//! - [`engine`] — the [`engine::AnalysisEngine`] trait plus the shipped
//!   tree-sitter implementation for C and C++
//!
//! # Example
//!
//! ```ignore
//! use cbcc_engine::engine::{CFamilyEngine, Position};
//! use cbcc_engine::proxy::AnalysisProxy;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let proxy = AnalysisProxy::new(CFamilyEngine::new());
//! let (unit, job) = proxy.create_unit(Path::new("src/main.cpp"), &[]);
//! job.wait(Duration::from_secs(10));
//!
//! let outcome = proxy.code_complete(
//!     unit,
//!     Path::new("src/main.cpp"),
//!     Position::new(42, 8),
//!     Duration::from_millis(500),
//! );
//! ```

pub mod database;
pub mod engine;
pub mod error;
pub mod events;
pub mod lang;
pub mod paths;
pub mod proxy;
pub mod treemap;
pub mod unit;
pub mod worker;

// Re-export commonly used types
pub use database::{AbstractToken, FileId, TokenDatabase, TokenId, TokenKind};
pub use engine::{
    AnalysisEngine, CFamilyEngine, CompletionCandidate, CompletionResult, CursorToken, Declaration,
    Diagnostic, Occurrence, Position, ReparseOutcome, Severity, UnsavedFiles,
};
pub use error::{CbccError, Result};
pub use events::{EventBus, SubscriptionId};
pub use lang::Lang;
pub use proxy::{AnalysisProxy, QueryOutcome};
pub use treemap::TreeMap;
pub use unit::{AnalysisUnit, UnitId};
pub use worker::{BackgroundWorker, JobHandle, JobState, WaitOutcome};
