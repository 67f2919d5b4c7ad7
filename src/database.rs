//! Persistent cross-file token database
//!
//! Stores abstract tokens (declaration sites keyed by identifier, structural
//! hash and declaring file) plus an interned filename table, and keeps both
//! incrementally reconciled as files are reparsed. The database outlives any
//! single analysis unit: tokens discovered while one translation unit was
//! alive keep answering queries after that unit is gone.
//!
//! # Id stability
//!
//! FileIds and TokenIds are never reassigned. A removed token is not
//! physically deleted; its FileId is set to [`FileId::NONE`] so callers still
//! holding the numeric id observe "not found" instead of someone else's
//! token. A later insert with the same identifier/hash/kind lookup key
//! overwrites the dead slot in place.
//!
//! # Persistence
//!
//! [`TokenDatabase::write_out`] / [`TokenDatabase::read_in`] serialize to a
//! binary stream: 4-byte magic `"CbCc"`, 4-byte version, then typed packets.
//! The layout is native-endian and explicitly not portable across
//! architectures. Any malformed packet aborts the whole load and leaves the
//! database fully cleared; callers treat that as "no prior index".

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::{CbccError, Result};
use crate::paths;
use crate::treemap::TreeMap;

/// Stable integer id of an interned filename.
///
/// Created lazily on first reference and never destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FileId(pub i32);

impl FileId {
    /// Sentinel marking a token as removed / a file as unknown
    pub const NONE: FileId = FileId(-1);

    /// True for ids that refer to an interned filename
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

/// Index into the token table; stable for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TokenId(pub u32);

/// What kind of declaration an abstract token stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    /// Namespace, class, struct, union or enum
    Scope,
    Function,
    Variable,
    Parameter,
    Unknown,
}

impl TokenKind {
    fn to_u32(self) -> u32 {
        match self {
            Self::Scope => 0,
            Self::Function => 1,
            Self::Variable => 2,
            Self::Parameter => 3,
            Self::Unknown => 4,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Scope),
            1 => Some(Self::Function),
            2 => Some(Self::Variable),
            3 => Some(Self::Parameter),
            4 => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// One declaration site in the cross-file index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbstractToken {
    pub kind: TokenKind,
    /// Declaring file; [`FileId::NONE`] marks an invalidated token
    pub file_id: FileId,
    /// 1-based line of the declaration name
    pub line: u32,
    /// 1-based column of the declaration name
    pub column: u32,
    pub identifier: String,
    /// Human-readable form, e.g. `int bar(float, char)`
    pub display_name: String,
    /// Name of the enclosing scope, empty at file scope
    pub scope_name: String,
    /// Structural hash of the declaration shape; two declarations with the
    /// same signature collapse to the same logical token across units
    pub hash: u32,
}

/// Interned filename plus the mtime recorded at its last indexing
#[derive(Debug, Clone, PartialEq)]
pub struct FilenameEntry {
    /// Normalized absolute path (see [`crate::paths::normalize`])
    pub path: String,
    /// Seconds since the Unix epoch; 0 means never indexed
    pub timestamp: u64,
}

const MAGIC: &[u8; 4] = b"CbCc";
const VERSION: u32 = 1;

const PACKET_END: u32 = 0;
const PACKET_FILENAMES: u32 = 1;
const PACKET_TOKENS: u32 = 2;

/// Upper bound for any length-prefixed string in the stream. Anything larger
/// is treated as corruption rather than attempted as an allocation.
const MAX_STRING_LEN: u32 = 1 << 20;

/// Persistent store of abstract tokens and interned filenames
#[derive(Debug, Default)]
pub struct TokenDatabase {
    tokens: Vec<AbstractToken>,
    filenames: Vec<FilenameEntry>,
    /// identifier -> token ids
    token_index: TreeMap,
    /// FileId decimal string -> token ids declared in that file
    file_index: TreeMap,
    /// normalized path -> file id
    filename_index: TreeMap,
}

impl TokenDatabase {
    /// Create a new empty database
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Filenames
    // ========================================================================

    /// Intern a path, returning its stable FileId.
    ///
    /// The path is normalized first; the same normalized path always yields
    /// the same id no matter how it was spelled.
    pub fn filename_id(&mut self, path: &Path) -> FileId {
        let key = paths::normalize(path);
        if let Some(&id) = self.filename_index.id_set(&key).first() {
            return FileId(id as i32);
        }

        let id = self.filenames.len() as u32;
        self.filenames.push(FilenameEntry {
            path: key.clone(),
            timestamp: 0,
        });
        self.filename_index.insert(&key, id);
        FileId(id as i32)
    }

    /// Look up a path without interning it
    pub fn lookup_filename_id(&self, path: &Path) -> Option<FileId> {
        let key = paths::normalize(path);
        self.filename_index
            .id_set(&key)
            .first()
            .map(|&id| FileId(id as i32))
    }

    /// Normalized path for an interned id
    pub fn filename(&self, id: FileId) -> Option<&str> {
        if !id.is_valid() {
            return None;
        }
        self.filenames.get(id.0 as usize).map(|e| e.path.as_str())
    }

    /// Last-indexed modification timestamp for a file (0 = never indexed)
    pub fn file_timestamp(&self, id: FileId) -> u64 {
        if !id.is_valid() {
            return 0;
        }
        self.filenames
            .get(id.0 as usize)
            .map(|e| e.timestamp)
            .unwrap_or(0)
    }

    /// Record the modification timestamp observed for a file
    pub fn set_file_timestamp(&mut self, id: FileId, timestamp: u64) {
        if let Some(entry) = id
            .is_valid()
            .then(|| self.filenames.get_mut(id.0 as usize))
            .flatten()
        {
            entry.timestamp = timestamp;
        }
    }

    /// Number of interned filenames
    pub fn filename_count(&self) -> usize {
        self.filenames.len()
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    /// Insert a token, returning the existing id when an equal token is
    /// already present.
    ///
    /// Matching is by identifier, structural hash, kind and declaring file.
    /// An invalidated slot with the same identifier/hash/kind key is revived
    /// in place rather than appending, which keeps TokenIds stable across a
    /// remove-then-reinsert cycle.
    pub fn insert_token(&mut self, token: AbstractToken) -> TokenId {
        if let Some(id) = self.token_id(
            &token.identifier,
            Some(token.file_id),
            token.kind,
            token.hash,
        ) {
            return id;
        }

        // Revive a dead slot left behind by a previous invalidation
        if let Some(id) = self.token_id(&token.identifier, Some(FileId::NONE), token.kind, token.hash)
        {
            let file_key = token.file_id.0.to_string();
            self.tokens[id.0 as usize] = token;
            self.file_index.insert(&file_key, id.0);
            return id;
        }

        let id = TokenId(self.tokens.len() as u32);
        self.token_index.insert(&token.identifier, id.0);
        self.file_index.insert(&token.file_id.0.to_string(), id.0);
        self.tokens.push(token);
        id
    }

    /// Find a token by its full lookup key.
    ///
    /// `file_id` of `None` matches across files.
    pub fn token_id(
        &self,
        identifier: &str,
        file_id: Option<FileId>,
        kind: TokenKind,
        hash: u32,
    ) -> Option<TokenId> {
        for &id in self.token_index.id_set(identifier) {
            let token = &self.tokens[id as usize];
            if token.hash != hash || token.kind != kind {
                continue;
            }
            match file_id {
                Some(wanted) if token.file_id != wanted => continue,
                _ => return Some(TokenId(id)),
            }
        }
        None
    }

    /// Fetch a token by id.
    ///
    /// Panics when `id` was never issued by this database instance; callers
    /// must only pass ids previously returned from it.
    pub fn token(&self, id: TokenId) -> &AbstractToken {
        &self.tokens[id.0 as usize]
    }

    /// All live tokens sharing an identifier, across files.
    ///
    /// Invalidated slots are holes in the identifier index and are skipped.
    pub fn token_matches(&self, identifier: &str) -> Vec<TokenId> {
        self.token_index
            .id_set(identifier)
            .iter()
            .copied()
            .filter(|&id| self.tokens[id as usize].file_id.is_valid())
            .map(TokenId)
            .collect()
    }

    /// All tokens whose declaring file equals `file_id`
    pub fn file_tokens(&self, file_id: FileId) -> Vec<TokenId> {
        if !file_id.is_valid() {
            return Vec::new();
        }
        self.file_index
            .id_set(&file_id.0.to_string())
            .iter()
            .copied()
            .map(TokenId)
            .collect()
    }

    /// Mark a token as removed.
    ///
    /// The slot stays allocated (ids held by callers remain safe to pass to
    /// [`Self::token`]); the token just stops matching lookups.
    pub fn remove_token(&mut self, id: TokenId) {
        let token = &mut self.tokens[id.0 as usize];
        if token.file_id.is_valid() {
            let file_key = token.file_id.0.to_string();
            token.file_id = FileId::NONE;
            self.file_index.remove(&file_key, id.0);
        }
    }

    /// Total token slots, dead ones included
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Tokens that still answer lookups
    pub fn live_token_count(&self) -> usize {
        self.tokens.iter().filter(|t| t.file_id.is_valid()).count()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.tokens.clear();
        self.filenames.clear();
        self.token_index.clear();
        self.file_index.clear();
        self.filename_index.clear();
    }

    // ========================================================================
    // Incremental reconciliation
    // ========================================================================

    /// Reconcile one file against a freshly produced standalone database.
    ///
    /// `fresh` is the token set a reparse just produced. Every fresh token is
    /// inserted-or-found here (its FileId translated through the filename
    /// table); tokens previously on `file_id` that the fresh set no longer
    /// contains are invalidated. Finally the file's timestamp is advanced to
    /// its on-disk mtime.
    ///
    /// Idempotent: running the same reconciliation twice invalidates nothing
    /// the first run inserted.
    pub fn update(&mut self, file_id: FileId, fresh: &TokenDatabase) {
        let mut old_ids: BTreeSet<u32> = self
            .file_tokens(file_id)
            .into_iter()
            .map(|id| id.0)
            .collect();

        for token in &fresh.tokens {
            if !token.file_id.is_valid() {
                continue;
            }
            let Some(path) = fresh.filename(token.file_id) else {
                continue;
            };
            let mapped_file = self.filename_id(Path::new(path));
            let mut mapped = token.clone();
            mapped.file_id = mapped_file;
            let id = self.insert_token(mapped);
            old_ids.remove(&id.0);
        }

        let stale = old_ids.len();
        for id in old_ids {
            self.remove_token(TokenId(id));
        }
        if stale > 0 {
            tracing::debug!(file_id = file_id.0, stale, "invalidated stale tokens");
        }

        if let Some(path) = self.filename(file_id).map(str::to_owned) {
            let mtime = paths::file_mtime(Path::new(&path));
            self.set_file_timestamp(file_id, mtime);
        }
    }

    // ========================================================================
    // Binary persistence
    // ========================================================================

    /// Serialize the database to a byte stream.
    ///
    /// Invalidated tokens are logically deleted and not written.
    pub fn write_out<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(MAGIC)?;
        write_u32(writer, VERSION)?;

        write_u32(writer, PACKET_FILENAMES)?;
        write_u32(writer, self.filenames.len() as u32)?;
        for entry in &self.filenames {
            write_str(writer, &entry.path)?;
            writer.write_all(&entry.timestamp.to_ne_bytes())?;
        }

        let live: Vec<&AbstractToken> = self
            .tokens
            .iter()
            .filter(|t| t.file_id.is_valid())
            .collect();
        write_u32(writer, PACKET_TOKENS)?;
        write_u32(writer, live.len() as u32)?;
        for token in live {
            write_u32(writer, token.kind.to_u32())?;
            writer.write_all(&token.file_id.0.to_ne_bytes())?;
            write_u32(writer, token.line)?;
            write_u32(writer, token.column)?;
            write_str(writer, &token.identifier)?;
            write_str(writer, &token.display_name)?;
            write_str(writer, &token.scope_name)?;
            write_u32(writer, token.hash)?;
        }

        write_u32(writer, PACKET_END)?;
        Ok(())
    }

    /// Load the database from a byte stream, replacing the current contents.
    ///
    /// Any malformed packet aborts the load; the database is left fully
    /// cleared rather than partially populated.
    pub fn read_in<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        self.clear();
        match self.read_in_inner(reader) {
            Ok(()) => {
                self.token_index.shrink();
                self.file_index.shrink();
                self.filename_index.shrink();
                tracing::info!(
                    filenames = self.filenames.len(),
                    tokens = self.tokens.len(),
                    "token database loaded"
                );
                Ok(())
            }
            Err(err) => {
                self.clear();
                tracing::warn!("token database load failed: {err}");
                Err(err)
            }
        }
    }

    fn read_in_inner<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| corrupt("truncated magic"))?;
        if &magic != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = read_u32(reader)?;
        if version != VERSION {
            return Err(corrupt(&format!("unsupported version {version}")));
        }

        loop {
            match read_u32(reader)? {
                PACKET_END => return Ok(()),
                PACKET_FILENAMES => self.read_filenames_packet(reader)?,
                PACKET_TOKENS => self.read_tokens_packet(reader)?,
                other => return Err(corrupt(&format!("unknown packet tag {other}"))),
            }
        }
    }

    fn read_filenames_packet<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let count = read_u32(reader)?;
        for _ in 0..count {
            let path = read_str(reader)?;
            let mut ts = [0u8; 8];
            reader
                .read_exact(&mut ts)
                .map_err(|_| corrupt("truncated filename timestamp"))?;
            let id = self.filenames.len() as u32;
            self.filename_index.insert(&path, id);
            self.filenames.push(FilenameEntry {
                path,
                timestamp: u64::from_ne_bytes(ts),
            });
        }
        Ok(())
    }

    fn read_tokens_packet<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let count = read_u32(reader)?;
        for _ in 0..count {
            let kind = TokenKind::from_u32(read_u32(reader)?)
                .ok_or_else(|| corrupt("unknown token kind"))?;
            let mut raw_file = [0u8; 4];
            reader
                .read_exact(&mut raw_file)
                .map_err(|_| corrupt("truncated token file id"))?;
            let file_id = FileId(i32::from_ne_bytes(raw_file));
            if !file_id.is_valid() || file_id.0 as usize >= self.filenames.len() {
                return Err(corrupt("token references unknown file"));
            }
            let line = read_u32(reader)?;
            let column = read_u32(reader)?;
            let identifier = read_str(reader)?;
            let display_name = read_str(reader)?;
            let scope_name = read_str(reader)?;
            let hash = read_u32(reader)?;

            let id = self.tokens.len() as u32;
            self.token_index.insert(&identifier, id);
            self.file_index.insert(&file_id.0.to_string(), id);
            self.tokens.push(AbstractToken {
                kind,
                file_id,
                line,
                column,
                identifier,
                display_name,
                scope_name,
                hash,
            });
        }
        Ok(())
    }
}

fn corrupt(message: &str) -> CbccError {
    CbccError::DatabaseCorrupt {
        message: message.to_string(),
    }
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_ne_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| corrupt("truncated stream"))?;
    Ok(u32::from_ne_bytes(buf))
}

fn write_str<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    write_u32(writer, value.len() as u32)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_u32(reader)?;
    if len > MAX_STRING_LEN {
        return Err(corrupt("string length out of range"));
    }
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .map_err(|_| corrupt("truncated string"))?;
    String::from_utf8(buf).map_err(|_| corrupt("invalid utf-8 in string"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn token(identifier: &str, file_id: FileId, line: u32, kind: TokenKind) -> AbstractToken {
        AbstractToken {
            kind,
            file_id,
            line,
            column: 1,
            identifier: identifier.to_string(),
            display_name: format!("int {identifier}()"),
            scope_name: String::new(),
            hash: crate::engine::signature_hash(&["int", identifier]),
        }
    }

    #[test]
    fn test_filename_interning_idempotent() {
        let mut db = TokenDatabase::new();
        let a = db.filename_id(Path::new("/home/user/project/foo.cpp"));
        let b = db.filename_id(Path::new("/home/user/project/foo.cpp"));
        assert_eq!(a, b);
        assert_eq!(db.filename_count(), 1);
    }

    #[test]
    fn test_filename_interning_normalizes_spelling() {
        let mut db = TokenDatabase::new();
        let a = db.filename_id(Path::new("/home/user/project/"));
        let b = db.filename_id(Path::new("/home/user/project"));
        let c = db.filename_id(Path::new("/home/user/./project"));
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(db.filename_count(), 1);
    }

    #[test]
    fn test_insert_token_dedupes() {
        let mut db = TokenDatabase::new();
        let file = db.filename_id(Path::new("/p/foo.cpp"));
        let a = db.insert_token(token("bar", file, 10, TokenKind::Function));
        let b = db.insert_token(token("bar", file, 10, TokenKind::Function));
        assert_eq!(a, b);
        assert_eq!(db.token_count(), 1);
    }

    #[test]
    fn test_token_id_any_file_matches_across_files() {
        let mut db = TokenDatabase::new();
        let f1 = db.filename_id(Path::new("/p/a.cpp"));
        let tok = token("bar", f1, 3, TokenKind::Function);
        let id = db.insert_token(tok.clone());

        assert_eq!(db.token_id("bar", None, TokenKind::Function, tok.hash), Some(id));
        assert_eq!(db.token_id("bar", Some(f1), TokenKind::Function, tok.hash), Some(id));
        let other = db.filename_id(Path::new("/p/b.cpp"));
        assert_eq!(db.token_id("bar", Some(other), TokenKind::Function, tok.hash), None);
    }

    #[test]
    fn test_remove_token_keeps_id_stable() {
        let mut db = TokenDatabase::new();
        let file = db.filename_id(Path::new("/p/foo.cpp"));
        let id = db.insert_token(token("bar", file, 10, TokenKind::Function));

        db.remove_token(id);
        assert_eq!(db.token(id).file_id, FileId::NONE);
        assert!(db.token_matches("bar").is_empty());
        assert!(db.file_tokens(file).is_empty());

        // Reinsert with the same lookup key revives the slot in place
        let revived = db.insert_token(token("bar", file, 12, TokenKind::Function));
        assert_eq!(revived, id);
        assert_eq!(db.token(id).line, 12);
        assert_eq!(db.token_matches("bar"), vec![id]);
    }

    fn fresh_db(names: &[&str], path: &str) -> TokenDatabase {
        let mut fresh = TokenDatabase::new();
        let file = fresh.filename_id(Path::new(path));
        for (i, name) in names.iter().enumerate() {
            fresh.insert_token(token(name, file, (i + 1) as u32, TokenKind::Function));
        }
        fresh
    }

    #[test]
    fn test_update_reconciliation() {
        let mut db = TokenDatabase::new();
        let file = db.filename_id(Path::new("/p/foo.cpp"));

        db.update(file, &fresh_db(&["A", "B", "C"], "/p/foo.cpp"));
        let a = db.token_matches("A")[0];
        let b = db.token_matches("B")[0];
        let c = db.token_matches("C")[0];

        db.update(file, &fresh_db(&["B", "C", "D"], "/p/foo.cpp"));
        assert!(db.token_matches("A").is_empty(), "A must be invalidated");
        assert_eq!(db.token_matches("B"), vec![b], "B keeps its id");
        assert_eq!(db.token_matches("C"), vec![c], "C keeps its id");
        let d = db.token_matches("D")[0];
        assert_ne!(d, a);

        // The dead slot is still addressable for anyone holding the old id
        assert_eq!(db.token(a).file_id, FileId::NONE);
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut db = TokenDatabase::new();
        let file = db.filename_id(Path::new("/p/foo.cpp"));
        db.update(file, &fresh_db(&["A", "B", "C"], "/p/foo.cpp"));

        let second = fresh_db(&["B", "C", "D"], "/p/foo.cpp");
        db.update(file, &second);
        let snapshot: Vec<_> = ["B", "C", "D"]
            .iter()
            .map(|n| db.token_matches(n))
            .collect();

        db.update(file, &second);
        for (i, name) in ["B", "C", "D"].iter().enumerate() {
            assert_eq!(db.token_matches(name), snapshot[i], "{name} changed on rerun");
        }
        assert!(db.token_matches("A").is_empty());
    }

    #[test]
    fn test_update_keeps_tokens_on_other_files() {
        let mut db = TokenDatabase::new();
        let foo = db.filename_id(Path::new("/p/foo.cpp"));
        let bar = db.filename_id(Path::new("/p/bar.cpp"));
        db.insert_token(token("keep_me", bar, 1, TokenKind::Function));

        db.update(foo, &fresh_db(&["A"], "/p/foo.cpp"));
        assert_eq!(db.token_matches("keep_me").len(), 1);
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut db = TokenDatabase::new();
        let foo = db.filename_id(Path::new("/p/foo.cpp"));
        let header = db.filename_id(Path::new("/p/foo.h"));
        db.set_file_timestamp(foo, 1234);
        db.insert_token(token("bar", foo, 10, TokenKind::Function));
        db.insert_token(token("count", header, 3, TokenKind::Variable));
        let dead = db.insert_token(token("gone", foo, 4, TokenKind::Function));
        db.remove_token(dead);

        let mut buf = Vec::new();
        db.write_out(&mut buf).unwrap();

        let mut loaded = TokenDatabase::new();
        loaded.read_in(&mut Cursor::new(&buf)).unwrap();

        assert_eq!(loaded.filename_count(), 2);
        assert_eq!(loaded.file_timestamp(FileId(0)), 1234);
        assert_eq!(loaded.live_token_count(), 2);
        // Logically deleted tokens are skipped on write
        assert!(loaded.token_matches("gone").is_empty());

        for name in ["bar", "count"] {
            let orig = db.token(db.token_matches(name)[0]).clone();
            let read = loaded.token(loaded.token_matches(name)[0]).clone();
            assert_eq!(orig.identifier, read.identifier);
            assert_eq!(orig.kind, read.kind);
            assert_eq!(orig.line, read.line);
            assert_eq!(orig.column, read.column);
            assert_eq!(orig.hash, read.hash);
            assert_eq!(db.filename(orig.file_id), loaded.filename(read.file_id));
        }
    }

    #[test]
    fn test_read_in_bad_magic_clears() {
        let mut db = TokenDatabase::new();
        db.filename_id(Path::new("/p/preexisting.cpp"));

        let err = db.read_in(&mut Cursor::new(b"NOPE".to_vec()));
        assert!(matches!(err, Err(CbccError::DatabaseCorrupt { .. })));
        assert_eq!(db.filename_count(), 0, "failed load must leave db cleared");
    }

    #[test]
    fn test_read_in_truncated_packet_clears() {
        let mut db = TokenDatabase::new();
        let file = db.filename_id(Path::new("/p/foo.cpp"));
        db.insert_token(token("bar", file, 10, TokenKind::Function));

        let mut buf = Vec::new();
        db.write_out(&mut buf).unwrap();
        buf.truncate(buf.len() - 6);

        let mut loaded = TokenDatabase::new();
        let err = loaded.read_in(&mut Cursor::new(&buf));
        assert!(matches!(err, Err(CbccError::DatabaseCorrupt { .. })));
        assert_eq!(loaded.token_count(), 0);
        assert_eq!(loaded.filename_count(), 0);
    }

    #[test]
    fn test_read_in_unknown_version_clears() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&7u32.to_ne_bytes());

        let mut db = TokenDatabase::new();
        assert!(db.read_in(&mut Cursor::new(&buf)).is_err());
        assert_eq!(db.filename_count(), 0);
    }
}
