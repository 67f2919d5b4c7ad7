//! Analysis proxy: unit pool, token database and job dispatch
//!
//! The [`AnalysisProxy`] is the single entry point hosts talk to. It owns
//! the pool of parsed [`AnalysisUnit`]s, the persistent [`TokenDatabase`],
//! the unsaved-buffer map and the [`EventBus`], and it funnels every
//! mutating operation through one [`BackgroundWorker`] thread.
//!
//! # Concurrency model
//!
//! Units, handles and the token database are mutated only inside worker
//! jobs, one at a time. Host threads enqueue jobs and optionally block on
//! them with a bounded wait; read-only inspection still takes the pool
//! mutex because slot recycling can reassign a unit id concurrently.
//!
//! A unit being rebuilt is swapped out of its slot for the duration, so no
//! thread ever observes a half-constructed handle.
//!
//! Timed-out queries are not cancelled. The job keeps running on the worker
//! and its result is simply never read; callers comparing file + position
//! of a dispatched request against the reply discard stale results
//! themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::database::{FileId, TokenDatabase, TokenId, TokenKind};
use crate::engine::{
    AnalysisEngine, CompletionResult, CursorToken, Occurrence, Position, UnsavedFiles,
};
use crate::error::Result;
use crate::events::{
    CodeCompleteFinishedEvent, DiagnosticsUpdatedEvent, EventBus, OccurrencesFinishedEvent,
    ReparseFinishedEvent, UnitCreatedEvent,
};
use crate::paths;
use crate::unit::{AnalysisUnit, UnitId};
use crate::worker::{BackgroundWorker, JobHandle};

/// Result of a bounded synchronous query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome<T> {
    Completed(T),
    /// The worker did not finish in time; the job keeps running unobserved
    TimedOut,
}

impl<T> QueryOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            QueryOutcome::Completed(value) => Some(value),
            QueryOutcome::TimedOut => None,
        }
    }
}

// ============================================================================
// Unit pool
// ============================================================================

/// Slot map of analysis units with explicit id recycling.
///
/// A `None` slot is either on the free list (removed, awaiting reuse) or
/// temporarily vacated while its unit is rebuilt on the worker thread.
struct UnitPool<E: AnalysisEngine> {
    slots: Vec<Option<AnalysisUnit<E>>>,
    free: Vec<UnitId>,
}

impl<E: AnalysisEngine> UnitPool<E> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Reserve a slot id. Prefers the free list, then recycles a slot whose
    /// unit is empty (lost its handle to a fatal reparse), then grows.
    /// The reserved slot holds `None` until the parsed unit is put in.
    fn allocate(&mut self) -> UnitId {
        if let Some(id) = self.free.pop() {
            return id;
        }
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|unit| unit.is_empty()) {
                *slot = None;
                return id;
            }
        }
        self.slots.push(None);
        self.slots.len() - 1
    }

    fn put(&mut self, unit: AnalysisUnit<E>) {
        let id = unit.id();
        self.slots[id] = Some(unit);
    }

    /// Vacate a slot for rebuild; the id stays reserved
    fn take(&mut self, id: UnitId) -> Option<AnalysisUnit<E>> {
        self.slots.get_mut(id).and_then(Option::take)
    }

    fn get(&self, id: UnitId) -> Option<&AnalysisUnit<E>> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    /// Release a slot entirely; the id goes back on the free list
    fn remove(&mut self, id: UnitId) -> Option<AnalysisUnit<E>> {
        let unit = self.slots.get_mut(id).and_then(Option::take)?;
        self.free.push(id);
        Some(unit)
    }

    /// Which unit covers `file_id`: the caller's current unit first, then a
    /// primary-file match, then include-set containment
    fn resolve(&self, current: Option<UnitId>, file_id: FileId) -> Option<UnitId> {
        if let Some(id) = current {
            if self.get(id).is_some_and(|u| u.contains(file_id)) {
                return Some(id);
            }
        }
        for (id, slot) in self.slots.iter().enumerate() {
            if slot.as_ref().is_some_and(|u| u.file_id() == file_id) {
                return Some(id);
            }
        }
        for (id, slot) in self.slots.iter().enumerate() {
            if slot.as_ref().is_some_and(|u| u.contains(file_id)) {
                return Some(id);
            }
        }
        None
    }

    fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

// ============================================================================
// Proxy
// ============================================================================

struct ProxyShared<E: AnalysisEngine> {
    engine: E,
    // Lock order: pool before db before unsaved; never hold any of them
    // while emitting events
    pool: Mutex<UnitPool<E>>,
    db: Mutex<TokenDatabase>,
    unsaved: Mutex<UnsavedFiles>,
    events: EventBus,
    current: Mutex<Option<UnitId>>,
}

/// Host-facing entry point for on-demand analysis
pub struct AnalysisProxy<E: AnalysisEngine> {
    shared: Arc<ProxyShared<E>>,
    worker: BackgroundWorker,
}

impl<E: AnalysisEngine> AnalysisProxy<E> {
    pub fn new(engine: E) -> Self {
        Self {
            shared: Arc::new(ProxyShared {
                engine,
                pool: Mutex::new(UnitPool::new()),
                db: Mutex::new(TokenDatabase::new()),
                unsaved: Mutex::new(UnsavedFiles::new()),
                events: EventBus::new(),
                current: Mutex::new(None),
            }),
            worker: BackgroundWorker::new(),
        }
    }

    /// Event stream for hosts; subscriptions are keyed by the returned id
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    // ========================================================================
    // Unsaved buffers
    // ========================================================================

    /// Record the in-editor contents of a file that differ from disk
    pub fn update_unsaved_file(&self, path: &Path, contents: impl Into<String>) {
        self.shared.unsaved.lock().insert(path, contents);
    }

    // ========================================================================
    // Unit lifecycle
    // ========================================================================

    /// Allocate a pool slot and queue a parse of `path`.
    ///
    /// The unit id is reserved immediately; the slot stays vacant until the
    /// background parse finishes. On completion the new unit becomes the
    /// current context unit and `unit_created` + `diagnostics_updated`
    /// events fire.
    pub fn create_unit(&self, path: &Path, args: &[String]) -> (UnitId, JobHandle) {
        let id = self.shared.pool.lock().allocate();
        let normalized = paths::normalize(path);
        let path: PathBuf = path.to_path_buf();
        let args: Vec<String> = args.to_vec();
        let shared = Arc::clone(&self.shared);

        let handle = self.worker.queue(move || {
            let mut unit = AnalysisUnit::new(id);
            let (parsed, diagnostics) = {
                let mut db = shared.db.lock();
                let unsaved = shared.unsaved.lock();
                let file_id = db.filename_id(&path);
                let parsed = unit
                    .parse(&shared.engine, &path, file_id, &args, &unsaved, &mut db)
                    .is_ok();
                let diagnostics = if parsed {
                    unit.diagnostics(&shared.engine, &path)
                } else {
                    Vec::new()
                };
                (parsed, diagnostics)
            };
            if !parsed {
                tracing::warn!(unit = id, file = %normalized, "initial parse failed");
            }

            shared.pool.lock().put(unit);
            *shared.current.lock() = Some(id);

            shared
                .events
                .emit(&UnitCreatedEvent::new(id, &normalized, parsed));
            shared
                .events
                .emit(&DiagnosticsUpdatedEvent::new(id, &normalized, diagnostics));
        });
        (id, handle)
    }

    /// Release a unit's slot; the id is recycled by a later `create_unit`
    pub fn remove_unit(&self, id: UnitId) -> JobHandle {
        let shared = Arc::clone(&self.shared);
        self.worker.queue(move || {
            if shared.pool.lock().remove(id).is_none() {
                tracing::debug!(unit = id, "remove requested for vacant slot");
            }
            let mut current = shared.current.lock();
            if *current == Some(id) {
                *current = None;
            }
        })
    }

    /// Queue an incremental reparse of unit `id` against current buffers
    pub fn reparse(&self, id: UnitId) -> JobHandle {
        let shared = Arc::clone(&self.shared);
        self.worker.queue(move || {
            // Vacate the slot so nothing observes the unit mid-rebuild
            let Some(mut unit) = shared.pool.lock().take(id) else {
                tracing::debug!(unit = id, "reparse requested for vacant slot");
                return;
            };

            let (filename, ok, diagnostics) = {
                let mut db = shared.db.lock();
                let unsaved = shared.unsaved.lock();
                let filename = db.filename(unit.file_id()).unwrap_or_default().to_string();
                let ok = unit.reparse(&shared.engine, &unsaved, &mut db).is_ok();
                let diagnostics = if ok {
                    unit.diagnostics(&shared.engine, Path::new(&filename))
                } else {
                    Vec::new()
                };
                (filename, ok, diagnostics)
            };
            if !ok {
                tracing::warn!(unit = id, file = %filename, "reparse failed; unit is now empty");
            }
            // An empty unit keeps its slot until removed or recycled
            shared.pool.lock().put(unit);

            shared
                .events
                .emit(&ReparseFinishedEvent::new(id, &filename, ok));
            shared
                .events
                .emit(&DiagnosticsUpdatedEvent::new(id, &filename, diagnostics));
        })
    }

    /// Unit covering `path`, preferring the current context unit
    pub fn translation_unit_id(&self, path: &Path) -> Option<UnitId> {
        let file_id = self.shared.db.lock().lookup_filename_id(path)?;
        let current = *self.shared.current.lock();
        self.shared.pool.lock().resolve(current, file_id)
    }

    /// Make `id` the preferred unit for subsequent resolution
    pub fn set_current_unit(&self, id: Option<UnitId>) {
        *self.shared.current.lock() = id;
    }

    pub fn unit_count(&self) -> usize {
        self.shared.pool.lock().occupied()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Code completion at a position, waiting up to `timeout`
    pub fn code_complete(
        &self,
        id: UnitId,
        path: &Path,
        position: Position,
        timeout: Duration,
    ) -> QueryOutcome<CompletionResult> {
        let shared = Arc::clone(&self.shared);
        let path = path.to_path_buf();
        let job = self.worker.queue_sync(move || {
            let Some(mut unit) = shared.pool.lock().take(id) else {
                return CompletionResult::default();
            };
            let result = {
                let unsaved = shared.unsaved.lock();
                unit.code_complete_at(&shared.engine, &path, position, &unsaved)
            };
            shared.pool.lock().put(unit);

            shared.events.emit(&CodeCompleteFinishedEvent::new(
                id,
                &paths::normalize(&path),
                position,
                result.candidates.len(),
            ));
            result
        });
        match job.wait(timeout) {
            Some(result) => QueryOutcome::Completed(result),
            None => QueryOutcome::TimedOut,
        }
    }

    /// Token under the cursor
    pub fn token_at(
        &self,
        id: UnitId,
        path: &Path,
        position: Position,
        timeout: Duration,
    ) -> QueryOutcome<Option<CursorToken>> {
        let shared = Arc::clone(&self.shared);
        let path = path.to_path_buf();
        let job = self.worker.queue_sync(move || {
            // Vacate the slot instead of holding the pool lock across the
            // engine traversal; host-thread lookups stay responsive
            let unit = shared.pool.lock().take(id)?;
            let token = unit.tokens_at(&shared.engine, &path, position);
            shared.pool.lock().put(unit);
            token
        });
        match job.wait(timeout) {
            Some(token) => QueryOutcome::Completed(token),
            None => QueryOutcome::TimedOut,
        }
    }

    /// All same-entity references within `path`
    pub fn occurrences(
        &self,
        id: UnitId,
        path: &Path,
        position: Position,
        timeout: Duration,
    ) -> QueryOutcome<Vec<Occurrence>> {
        let shared = Arc::clone(&self.shared);
        let path = path.to_path_buf();
        let job = self.worker.queue_sync(move || {
            let Some(unit) = shared.pool.lock().take(id) else {
                return Vec::new();
            };
            let identifier = unit
                .tokens_at(&shared.engine, &path, position)
                .map(|t| t.identifier)
                .unwrap_or_default();
            let occurrences = unit.occurrences_of(&shared.engine, &path, position);
            shared.pool.lock().put(unit);

            shared.events.emit(&OccurrencesFinishedEvent::new(
                id,
                &paths::normalize(&path),
                &identifier,
                occurrences.len(),
            ));
            occurrences
        });
        match job.wait(timeout) {
            Some(occurrences) => QueryOutcome::Completed(occurrences),
            None => QueryOutcome::TimedOut,
        }
    }

    /// Declaration location for the entity under the cursor.
    ///
    /// Falls back to the cross-file token database when the unit cannot
    /// resolve the cursor within its own translation unit.
    pub fn resolve_declaration(
        &self,
        id: UnitId,
        path: &Path,
        position: Position,
        timeout: Duration,
    ) -> QueryOutcome<Option<(String, Position)>> {
        let shared = Arc::clone(&self.shared);
        let path = path.to_path_buf();
        let job = self.worker.queue_sync(move || {
            // Same vacate-query-put dance as code_complete; the pool lock is
            // never held across the engine traversal
            let unit = shared.pool.lock().take(id)?;
            let resolved = unit.resolve_declaration_at(&shared.engine, &path, position);
            let token = if resolved.is_none() {
                unit.tokens_at(&shared.engine, &path, position)
            } else {
                None
            };
            shared.pool.lock().put(unit);
            if resolved.is_some() {
                return resolved;
            }

            // Cross-file fallback: any live token with the same identifier
            let token = token?;
            let db = shared.db.lock();
            let matches = db.token_matches(&token.identifier);
            let hit = db.token(*matches.first()?);
            let filename = db.filename(hit.file_id)?.to_string();
            Some((filename, Position::new(hit.line, hit.column)))
        });
        match job.wait(timeout) {
            Some(found) => QueryOutcome::Completed(found),
            None => QueryOutcome::TimedOut,
        }
    }

    /// Call tips for functions named `identifier`, from the cross-file index
    pub fn call_tips(&self, identifier: &str) -> Vec<String> {
        let db = self.shared.db.lock();
        db.token_matches(identifier)
            .into_iter()
            .map(|id| db.token(id))
            .filter(|t| t.kind == TokenKind::Function)
            .map(|t| t.display_name.clone())
            .collect()
    }

    /// Plain-text summary of a token, assembled from the database
    pub fn documentation_for(&self, token_id: TokenId) -> Option<String> {
        let db = self.shared.db.lock();
        if token_id.0 as usize >= db.token_count() {
            return None;
        }
        let token = db.token(token_id);
        if !token.file_id.is_valid() {
            return None;
        }
        let filename = db.filename(token.file_id)?;

        let mut text = format!("{}\nkind: {}", token.display_name, kind_name(token.kind));
        if !token.scope_name.is_empty() {
            text.push_str(&format!("\nscope: {}", token.scope_name));
        }
        text.push_str(&format!(
            "\ndeclared at {}:{}:{}",
            filename, token.line, token.column
        ));
        Some(text)
    }

    // ========================================================================
    // Index persistence
    // ========================================================================

    /// Write the token database to `path`
    pub fn save_index(&self, path: &Path) -> Result<()> {
        let db = self.shared.db.lock();
        let mut file = std::fs::File::create(path)?;
        db.write_out(&mut file)?;
        tracing::info!(file = %path.display(), tokens = db.live_token_count(), "index saved");
        Ok(())
    }

    /// Load a previously saved token database, replacing the current one.
    ///
    /// A corrupt stream leaves the database cleared; callers treat that as
    /// "no prior index".
    pub fn load_index(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::open(path)?;
        let mut db = self.shared.db.lock();
        db.read_in(&mut file)?;
        tracing::info!(file = %path.display(), tokens = db.live_token_count(), "index loaded");
        Ok(())
    }

    /// Read-only access to the token database, for host-side lookups
    pub fn with_database<R>(&self, f: impl FnOnce(&TokenDatabase) -> R) -> R {
        f(&self.shared.db.lock())
    }
}

fn kind_name(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Scope => "scope",
        TokenKind::Function => "function",
        TokenKind::Variable => "variable",
        TokenKind::Parameter => "parameter",
        TokenKind::Unknown => "unknown",
    }
}

// ============================================================================
// Tests
// ============================================================================
