//! Analysis-unit wrapper
//!
//! One [`AnalysisUnit`] owns the opaque handle for a single translation
//! unit: the engine state produced by parsing one primary file plus the set
//! of files it transitively includes. Producing a handle can cost hundreds
//! of milliseconds, so units live in the proxy's pool and are reused across
//! queries.
//!
//! A unit with no handle is *empty*: either its slot was never parsed or the
//! engine reported a fatal reparse. Empty units answer every query with an
//! empty result and stay useless until a fresh [`AnalysisUnit::parse`].

use std::path::Path;

use crate::database::{AbstractToken, FileId, TokenDatabase};
use crate::engine::{
    AnalysisEngine, CompletionResult, CursorToken, Diagnostic, Occurrence, Position,
    ReparseOutcome, Severity, UnsavedFiles,
};
use crate::error::{CbccError, Result};
use crate::paths;

/// Index of a unit inside the proxy's pool; recycled after removal
pub type UnitId = usize;

/// One parsed translation unit plus its query caches
pub struct AnalysisUnit<E: AnalysisEngine> {
    id: UnitId,
    file_id: FileId,
    /// Sorted FileIds of every file the unit covers, primary included.
    /// Populated by a successful parse; binary-searched by [`Self::contains`].
    files: Vec<FileId>,
    handle: Option<E::Handle>,
    /// Most recent completion result, disposed before each new query
    last_completion: Option<CompletionResult>,
    last_position: Position,
}

impl<E: AnalysisEngine> AnalysisUnit<E> {
    /// Create an empty unit occupying pool slot `id`
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            file_id: FileId::NONE,
            files: Vec::new(),
            handle: None,
            last_completion: None,
            last_position: Position::default(),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    /// FileId of the primary file
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Sorted include set, primary file included
    pub fn files(&self) -> &[FileId] {
        &self.files
    }

    /// An empty unit has no usable handle and needs a fresh parse
    pub fn is_empty(&self) -> bool {
        self.handle.is_none()
    }

    /// Whether the unit covers `file_id`, via its transitive include set
    pub fn contains(&self, file_id: FileId) -> bool {
        self.files.binary_search(&file_id).is_ok()
    }

    pub fn last_completion(&self) -> Option<&CompletionResult> {
        self.last_completion.as_ref()
    }

    pub fn last_position(&self) -> Position {
        self.last_position
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Parse `path` from scratch, replacing any previous handle.
    ///
    /// On success the include set is rebuilt and every declaration the walk
    /// produced is reconciled into `db`.
    pub fn parse(
        &mut self,
        engine: &E,
        path: &Path,
        file_id: FileId,
        args: &[String],
        unsaved: &UnsavedFiles,
        db: &mut TokenDatabase,
    ) -> Result<()> {
        self.handle = None;
        self.last_completion = None;
        self.files.clear();
        self.file_id = file_id;

        let handle = engine.parse(path, args, unsaved).ok_or_else(|| {
            CbccError::ParseFailure {
                message: format!("engine produced no handle for {}", path.display()),
            }
        })?;

        self.index(engine, &handle, db);
        self.handle = Some(handle);
        Ok(())
    }

    /// Incrementally reparse against updated buffers.
    ///
    /// A fatal engine report disposes the handle; the unit stays empty until
    /// the caller re-issues a fresh [`Self::parse`] — the core never retries
    /// on its own.
    pub fn reparse(
        &mut self,
        engine: &E,
        unsaved: &UnsavedFiles,
        db: &mut TokenDatabase,
    ) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Err(CbccError::ParseFailure {
                message: "reparse requested on an empty unit".to_string(),
            });
        };
        self.last_completion = None;

        match engine.reparse(&mut handle, unsaved) {
            ReparseOutcome::Ok => {
                self.index(engine, &handle, db);
                self.handle = Some(handle);
                Ok(())
            }
            ReparseOutcome::Fatal => Err(CbccError::EngineFatal {
                message: "handle no longer usable after reparse".to_string(),
            }),
        }
    }

    /// Rebuild the include set and reconcile the token database from the
    /// current AST
    fn index(&mut self, engine: &E, handle: &E::Handle, db: &mut TokenDatabase) {
        let mut files: Vec<FileId> = engine
            .includes(handle)
            .iter()
            .map(|p| db.filename_id(Path::new(p)))
            .collect();
        files.sort_unstable();
        files.dedup();
        self.files = files;

        let mut fresh = TokenDatabase::new();
        for decl in engine.declarations(handle) {
            let fresh_file = fresh.filename_id(Path::new(&decl.file));
            fresh.insert_token(AbstractToken {
                kind: decl.kind,
                file_id: fresh_file,
                line: decl.position.line,
                column: decl.position.column,
                identifier: decl.identifier,
                display_name: decl.display_name,
                scope_name: decl.scope_name,
                hash: decl.hash,
            });
        }
        db.update(self.file_id, &fresh);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Run code completion, caching the result and query position.
    ///
    /// The previous cached result is disposed first. Diagnostics in the
    /// result are filtered to `path` and severities below warning dropped.
    pub fn code_complete_at(
        &mut self,
        engine: &E,
        path: &Path,
        position: Position,
        unsaved: &UnsavedFiles,
    ) -> CompletionResult {
        self.last_completion = None;
        self.last_position = position;

        let Some(handle) = &self.handle else {
            return CompletionResult::default();
        };
        let mut result = engine.complete_at(handle, path, position, unsaved);
        filter_diagnostics(&mut result.diagnostics, path);
        self.last_completion = Some(result.clone());
        result
    }

    /// Resolve the token under the cursor
    pub fn tokens_at(&self, engine: &E, path: &Path, position: Position) -> Option<CursorToken> {
        let handle = self.handle.as_ref()?;
        engine.cursor_at(handle, path, position)
    }

    /// All references to the entity under the cursor, within `path`
    pub fn occurrences_of(&self, engine: &E, path: &Path, position: Position) -> Vec<Occurrence> {
        let Some(handle) = &self.handle else {
            return Vec::new();
        };
        let Some(mut token) = engine.cursor_at(handle, path, position) else {
            return Vec::new();
        };
        // Occurrences are enumerated in the queried file, not the one
        // holding the declaration
        token.file = paths::normalize(path);
        engine.find_references(handle, &token)
    }

    /// Declaration (preferring the definition) for the entity under the
    /// cursor; falls back to the first reference the engine knows about
    pub fn resolve_declaration_at(
        &self,
        engine: &E,
        path: &Path,
        position: Position,
    ) -> Option<(String, Position)> {
        let token = self.tokens_at(engine, path, position)?;
        if token.kind == crate::database::TokenKind::Unknown {
            return None;
        }
        Some((token.file, token.position))
    }

    /// Current diagnostics for one file of interest
    pub fn diagnostics(&self, engine: &E, path: &Path) -> Vec<Diagnostic> {
        let Some(handle) = &self.handle else {
            return Vec::new();
        };
        let mut diags = engine.diagnostics(handle);
        filter_diagnostics(&mut diags, path);
        diags
    }
}

/// Keep only diagnostics about `path` at warning severity or above
fn filter_diagnostics(diagnostics: &mut Vec<Diagnostic>, path: &Path) {
    let normalized = paths::normalize(path);
    diagnostics.retain(|d| d.severity >= Severity::Warning && d.file == normalized);
}

// ============================================================================
// Tests
// ============================================================================
