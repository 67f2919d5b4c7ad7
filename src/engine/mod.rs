//! Abstract analysis-engine interface
//!
//! The core of this crate (units, worker, proxy, token database) never talks
//! to a concrete parser; it drives an [`AnalysisEngine`] — an opaque
//! collaborator that can parse a file into a handle, incrementally reparse
//! that handle, and answer point-queries against it. The crate ships one
//! implementation, [`CFamilyEngine`], built on tree-sitter.

mod clike;

pub use clike::CFamilyEngine;

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::database::TokenKind;
use crate::paths;

/// Editor buffers that are newer than their on-disk files, keyed by
/// normalized path
#[derive(Debug, Default, Clone)]
pub struct UnsavedFiles {
    buffers: HashMap<String, String>,
}

impl UnsavedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the unsaved contents for a file
    pub fn insert(&mut self, path: impl AsRef<Path>, contents: impl Into<String>) {
        self.buffers
            .insert(paths::normalize(path.as_ref()), contents.into());
    }

    /// Unsaved contents for a file, if any
    pub fn get(&self, path: &Path) -> Option<&str> {
        self.buffers.get(&paths::normalize(path)).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }
}

/// 1-based source position; columns count bytes within the line, the same
/// unit tree-sitter Points use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Diagnostic severity; anything below `Warning` is dropped before results
/// reach the editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

/// One diagnostic reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Normalized path of the file the diagnostic is about
    pub file: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column range (start, end) on that line
    pub range: (u32, u32),
    pub severity: Severity,
    pub message: String,
}

/// One ranked completion candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionCandidate {
    pub identifier: String,
    pub display_name: String,
    pub kind: TokenKind,
    /// Higher ranks earlier in the completion list
    pub priority: u32,
}

/// Result of a code-completion query: ranked candidates plus the diagnostics
/// the engine discovered incidentally
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletionResult {
    pub candidates: Vec<CompletionCandidate>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolution of a cursor position to the entity under it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorToken {
    pub identifier: String,
    pub display_name: String,
    pub scope_name: String,
    pub kind: TokenKind,
    /// Normalized path of the file holding the resolved declaration
    pub file: String,
    /// Position of the resolved declaration name
    pub position: Position,
    /// True when the resolution points at a definition rather than a
    /// forward declaration
    pub is_definition: bool,
    pub hash: u32,
}

/// One same-entity reference within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub line: u32,
    pub column: u32,
    pub length: u32,
}

/// One declaration-like node produced by the engine's AST walk
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub kind: TokenKind,
    /// Normalized path of the declaring file
    pub file: String,
    pub position: Position,
    pub identifier: String,
    pub display_name: String,
    pub scope_name: String,
    pub hash: u32,
    pub is_definition: bool,
}

/// Outcome of an incremental reparse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReparseOutcome {
    Ok,
    /// The handle is no longer usable; the owning unit must be emptied and
    /// freshly parsed
    Fatal,
}

/// Opaque semantic-analysis engine.
///
/// A handle is expensive to produce (hundreds of milliseconds for a large
/// translation unit); the proxy caches handles in its unit pool and all
/// methods taking a handle run on the background worker thread.
pub trait AnalysisEngine: Send + Sync + 'static {
    /// Parsed-state handle for one translation unit
    type Handle: Send;

    /// Parse a file with compiler-style arguments. `None` means the engine
    /// could not produce a handle; the unit stays empty.
    fn parse(&self, path: &Path, args: &[String], unsaved: &UnsavedFiles)
        -> Option<Self::Handle>;

    /// Incrementally reparse an existing handle against updated buffers
    fn reparse(&self, handle: &mut Self::Handle, unsaved: &UnsavedFiles) -> ReparseOutcome;

    /// Normalized paths of every file the unit transitively includes,
    /// the primary file first among them
    fn includes(&self, handle: &Self::Handle) -> Vec<String>;

    /// Every declaration-like node across the unit's files
    fn declarations(&self, handle: &Self::Handle) -> Vec<Declaration>;

    /// Ranked completion candidates at a position
    fn complete_at(
        &self,
        handle: &Self::Handle,
        path: &Path,
        position: Position,
        unsaved: &UnsavedFiles,
    ) -> CompletionResult;

    /// Resolve the cursor to the declaration (preferring the definition) of
    /// the entity under it
    fn cursor_at(&self, handle: &Self::Handle, path: &Path, position: Position)
        -> Option<CursorToken>;

    /// Enumerate all references to the token's entity within `token.file`
    fn find_references(&self, handle: &Self::Handle, token: &CursorToken) -> Vec<Occurrence>;

    /// All diagnostics currently known for the unit
    fn diagnostics(&self, handle: &Self::Handle) -> Vec<Diagnostic>;
}

/// 32-bit FNV-1a over the structural parts of a declaration.
///
/// Deterministic across processes — hashes are persisted in the token
/// database stream, so this must never depend on randomized state.
pub fn signature_hash(parts: &[&str]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for part in parts {
        for byte in part.bytes() {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        // Separator so ["ab","c"] and ["a","bc"] differ
        hash ^= 0xff;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// ============================================================================
// Tests
// ============================================================================
