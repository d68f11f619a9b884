//! Durable, per-user partitioned storage of conversation exchanges.
//!
//! Every mutable structure is partitioned by user id: operations on
//! different users never block each other, and a per-user mutex gives
//! stores single-writer discipline (monotonic ids, consistent profile).
//! Persistence goes through [`StorageBackend`] so the on-disk layout can
//! be swapped without touching ranking logic.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::MemoryConfig;
use crate::context::{self, ContextBlock};
use crate::corpus::CorpusStats;
use crate::error::MemoryError;
use crate::profile::UserProfile;
use crate::rank;
use crate::vectorize::{self, TermVector};

const MAX_ID_LEN: usize = 128;
const MAX_TEXT_LEN: usize = 8192;

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

/// One stored user/agent exchange. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Monotonically increasing within a user, starting at 1.
    pub id: u64,
    pub user_id: String,
    pub thread_id: String,
    /// Creation time, unix ms.
    pub timestamp: i64,
    pub query_text: String,
    pub response_text: String,
    /// Sparse term → weight map derived from query + response at store time.
    pub term_vector: TermVector,
    pub topics: Vec<String>,
}

impl MemoryEntry {
    /// Query and response joined — the text the vector and topics were
    /// derived from.
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.query_text, self.response_text)
    }
}

/// Everything persisted for one user: profile, id counter, and entries
/// grouped by thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub profile: UserProfile,
    pub next_id: u64,
    pub threads: BTreeMap<String, Vec<MemoryEntry>>,
}

impl UserRecord {
    pub fn new(user_id: &str) -> Self {
        Self {
            profile: UserProfile::new(user_id),
            next_id: 1,
            threads: BTreeMap::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.threads.values().map(Vec::len).sum()
    }

    fn all_entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.threads.values().flatten()
    }
}

/// Swappable persistence capability. Records are read and rewritten in
/// full; there are no partial-record updates.
pub trait StorageBackend: Send + Sync {
    fn read(&self, user_id: &str) -> Result<Option<UserRecord>, MemoryError>;
    fn write(&self, user_id: &str, record: &UserRecord) -> Result<(), MemoryError>;
    /// Remove all persisted state for a user. Must be idempotent.
    fn delete(&self, user_id: &str) -> Result<(), MemoryError>;
    /// User ids with persisted state, for warm restart.
    fn list_users(&self) -> Result<Vec<String>, MemoryError>;
}

// ---------------------------------------------------------------------------
// In-memory backend

/// Backend for tests and `--data :memory:` runs.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, UserRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, user_id: &str) -> Result<Option<UserRecord>, MemoryError> {
        Ok(self.records.lock().get(user_id).cloned())
    }

    fn write(&self, user_id: &str, record: &UserRecord) -> Result<(), MemoryError> {
        self.records.lock().insert(user_id.to_string(), record.clone());
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<(), MemoryError> {
        self.records.lock().remove(user_id);
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<String>, MemoryError> {
        let mut users: Vec<String> = self.records.lock().keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

// ---------------------------------------------------------------------------
// File backend

/// Per-user JSON layout under `root`:
///
/// ```text
/// users/<safe_id>/profile.json
/// users/<safe_id>/conversations/<thread>.json
/// ```
///
/// `clear()` removes the user's whole subtree.
pub struct FileBackend {
    root: PathBuf,
}

/// profile.json body — the profile plus the id counter.
#[derive(Debug, Serialize, Deserialize)]
struct ProfileFile {
    profile: UserProfile,
    next_id: u64,
}

/// conversations/<thread>.json body. Entries are held as raw JSON so one
/// corrupt entry can be skipped without losing its neighbors.
#[derive(Debug, Serialize, Deserialize)]
struct ThreadFile {
    thread_id: String,
    entries: Vec<serde_json::Value>,
}

/// Map an external id to a filesystem-safe name.
fn safe_name(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Write via a temp file + rename so readers never observe a half-written
/// record.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MemoryError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("users"))?;
        Ok(Self { root })
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join("users").join(safe_name(user_id))
    }

    fn load_threads(
        &self,
        user_id: &str,
        dir: &Path,
    ) -> Result<BTreeMap<String, Vec<MemoryEntry>>, MemoryError> {
        let mut threads: BTreeMap<String, Vec<MemoryEntry>> = BTreeMap::new();
        let conv_dir = dir.join("conversations");
        let read_dir = match std::fs::read_dir(&conv_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(threads),
            Err(e) => return Err(e.into()),
        };
        for dirent in read_dir {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            let file: ThreadFile = match serde_json::from_str(&raw) {
                Ok(f) => f,
                Err(e) => {
                    warn!(user = user_id, path = %path.display(), error = %e,
                        "skipping unreadable conversation record");
                    continue;
                }
            };
            for value in file.entries {
                match serde_json::from_value::<MemoryEntry>(value) {
                    Ok(entry) => threads.entry(entry.thread_id.clone()).or_default().push(entry),
                    Err(e) => {
                        warn!(user = user_id, thread = %file.thread_id, error = %e,
                            "skipping corrupt entry");
                    }
                }
            }
        }
        for entries in threads.values_mut() {
            entries.sort_by_key(|e| (e.timestamp, e.id));
        }
        Ok(threads)
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, user_id: &str) -> Result<Option<UserRecord>, MemoryError> {
        let dir = self.user_dir(user_id);
        if !dir.exists() {
            return Ok(None);
        }
        let threads = self.load_threads(user_id, &dir)?;

        let profile_path = dir.join("profile.json");
        let stored = match std::fs::read_to_string(&profile_path) {
            Ok(raw) => serde_json::from_str::<ProfileFile>(&raw)
                .map_err(|e| {
                    warn!(user = user_id, error = %e, "unreadable profile record, re-deriving");
                })
                .ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        // the counter must never trail the entries on disk: a write that
        // died between profile.json and a thread file leaves them out of
        // step, and a trailing counter would reissue ids
        let floor = threads
            .values()
            .flatten()
            .map(|e| e.id)
            .max()
            .map_or(1, |m| m + 1);
        let record = match stored {
            Some(p) => UserRecord {
                profile: p.profile,
                next_id: p.next_id.max(floor),
                threads,
            },
            None => {
                // entries are the source of truth; the profile is a pure
                // aggregate and the id counter resumes past the max seen
                let profile =
                    UserProfile::rederive(user_id, threads.values().flatten().cloned());
                UserRecord { profile, next_id: floor, threads }
            }
        };
        Ok(Some(record))
    }

    fn write(&self, user_id: &str, record: &UserRecord) -> Result<(), MemoryError> {
        let dir = self.user_dir(user_id);
        std::fs::create_dir_all(dir.join("conversations"))?;

        // counter first: if a thread write fails afterwards the persisted
        // counter overshoots (ids skip), it never reissues
        let profile = ProfileFile {
            profile: record.profile.clone(),
            next_id: record.next_id,
        };
        write_atomic(&dir.join("profile.json"), &serde_json::to_vec_pretty(&profile)?)?;

        for (thread_id, entries) in &record.threads {
            let file = ThreadFile {
                thread_id: thread_id.clone(),
                entries: entries
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<_, _>>()?,
            };
            let path = dir
                .join("conversations")
                .join(format!("{}.json", safe_name(thread_id)));
            write_atomic(&path, &serde_json::to_vec_pretty(&file)?)?;
        }
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<(), MemoryError> {
        match std::fs::remove_dir_all(self.user_dir(user_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_users(&self) -> Result<Vec<String>, MemoryError> {
        let mut users = Vec::new();
        for dirent in std::fs::read_dir(self.root.join("users"))? {
            let dir = dirent?.path();
            if !dir.is_dir() {
                continue;
            }
            // recover the original (unsanitized) id from the stored records
            let from_profile = std::fs::read_to_string(dir.join("profile.json"))
                .ok()
                .and_then(|raw| serde_json::from_str::<ProfileFile>(&raw).ok())
                .map(|p| p.profile.user_id);
            match from_profile {
                Some(id) => users.push(id),
                None => {
                    let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
                    let fallback = self
                        .load_threads(dir_name, &dir)?
                        .values()
                        .flatten()
                        .next()
                        .map(|e| e.user_id.clone());
                    match fallback {
                        Some(id) => users.push(id),
                        None => warn!(path = %dir.display(), "skipping user dir with no readable records"),
                    }
                }
            }
        }
        users.sort();
        Ok(users)
    }
}

// ---------------------------------------------------------------------------
// Store facade

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub users: usize,
    pub entries: usize,
    pub corpus_docs: u64,
    pub corpus_terms: usize,
}

type UserSlot = Arc<Mutex<Option<UserRecord>>>;

/// The memory subsystem facade: entry store, vectorizer, ranker, context
/// assembler, and profile tracker behind one handle.
pub struct MemoryStore {
    backend: Arc<dyn StorageBackend>,
    corpus: Arc<CorpusStats>,
    config: MemoryConfig,
    users: RwLock<HashMap<String, UserSlot>>,
}

#[derive(Clone, Copy)]
enum IdKind {
    User,
    Thread,
}

impl IdKind {
    fn label(self) -> &'static str {
        match self {
            IdKind::User => "user id",
            IdKind::Thread => "thread id",
        }
    }

    fn empty_error(self) -> MemoryError {
        match self {
            IdKind::User => MemoryError::EmptyUser,
            IdKind::Thread => MemoryError::Validation("thread id must not be empty".into()),
        }
    }
}

fn validate_id(kind: IdKind, value: &str) -> Result<(), MemoryError> {
    if value.trim().is_empty() {
        return Err(kind.empty_error());
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(MemoryError::Validation(format!(
            "{} too long (max {MAX_ID_LEN})",
            kind.label()
        )));
    }
    Ok(())
}

impl MemoryStore {
    /// Open the store over a backend, rebuilding corpus statistics from
    /// every persisted entry (warm restart is a deterministic re-derivation).
    pub fn open(
        backend: Arc<dyn StorageBackend>,
        corpus: Arc<CorpusStats>,
        config: MemoryConfig,
    ) -> Result<Self, MemoryError> {
        let mut users = HashMap::new();
        let mut entries = 0usize;
        for user_id in backend.list_users()? {
            if let Some(record) = backend.read(&user_id)? {
                for entry in record.all_entries() {
                    vectorize::update_corpus(&corpus, &entry.combined_text());
                }
                entries += record.entry_count();
                users.insert(user_id, Arc::new(Mutex::new(Some(record))));
            }
        }
        info!(users = users.len(), entries, "memory store opened");
        Ok(Self {
            backend,
            corpus,
            config,
            users: RwLock::new(users),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn slot(&self, user_id: &str) -> UserSlot {
        if let Some(slot) = self.users.read().get(user_id) {
            return Arc::clone(slot);
        }
        let mut map = self.users.write();
        Arc::clone(map.entry(user_id.to_string()).or_default())
    }

    fn load<'a>(
        &self,
        guard: &'a mut Option<UserRecord>,
        user_id: &str,
    ) -> Result<&'a mut UserRecord, MemoryError> {
        if guard.is_none() {
            let record = self
                .backend
                .read(user_id)?
                .unwrap_or_else(|| UserRecord::new(user_id));
            *guard = Some(record);
        }
        guard
            .as_mut()
            .ok_or_else(|| MemoryError::Internal("user slot empty after load".into()))
    }

    /// Persist one completed exchange. The entry, the profile update, and
    /// the corpus update commit together: a persistence failure surfaces
    /// as an error and leaves no partial state anywhere.
    pub fn store(
        &self,
        user_id: &str,
        thread_id: &str,
        query_text: &str,
        response_text: &str,
    ) -> Result<MemoryEntry, MemoryError> {
        validate_id(IdKind::User, user_id)?;
        validate_id(IdKind::Thread, thread_id)?;
        let query_text = query_text.trim();
        let response_text = response_text.trim();
        if query_text.is_empty() {
            return Err(MemoryError::EmptyQuery);
        }
        if query_text.chars().count() > MAX_TEXT_LEN
            || response_text.chars().count() > MAX_TEXT_LEN
        {
            return Err(MemoryError::TextTooLong);
        }

        let slot = self.slot(user_id);
        let mut guard = slot.lock();
        let record = self.load(&mut guard, user_id)?;

        let combined = format!("{query_text} {response_text}");
        let entry = MemoryEntry {
            id: record.next_id,
            user_id: user_id.to_string(),
            thread_id: thread_id.to_string(),
            timestamp: now_ms(),
            query_text: query_text.to_string(),
            response_text: response_text.to_string(),
            // weighted against the corpus as it stands before this entry
            term_vector: vectorize::embed(&self.corpus, &combined),
            topics: self.config.topics.assign(&combined),
        };

        let mut staged = record.clone();
        staged.next_id += 1;
        staged.profile.record(&entry);
        staged
            .threads
            .entry(thread_id.to_string())
            .or_default()
            .push(entry.clone());

        // durable write first; in-memory and corpus state only move on success
        self.backend.write(user_id, &staged)?;
        *record = staged;
        vectorize::update_corpus(&self.corpus, &combined);

        info!(user = user_id, thread = thread_id, id = entry.id, "stored exchange");
        Ok(entry)
    }

    /// Entries for a user, oldest first, optionally restricted to a thread.
    pub fn list_entries(
        &self,
        user_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        validate_id(IdKind::User, user_id)?;
        let slot = self.slot(user_id);
        let mut guard = slot.lock();
        let record = self.load(&mut guard, user_id)?;
        let mut entries: Vec<MemoryEntry> = match thread_id {
            Some(t) => record.threads.get(t).cloned().unwrap_or_default(),
            None => record.all_entries().cloned().collect(),
        };
        entries.sort_by_key(|e| (e.timestamp, e.id));
        Ok(entries)
    }

    /// Remove all entries and reset the profile for a user. Idempotent:
    /// a second clear is a no-op, never an error.
    pub fn clear(&self, user_id: &str) -> Result<(), MemoryError> {
        validate_id(IdKind::User, user_id)?;
        let slot = self.slot(user_id);
        let mut guard = slot.lock();
        self.load(&mut guard, user_id)?;

        // persisted subtree goes first; on failure nothing has changed
        self.backend.delete(user_id)?;
        if let Some(record) = guard.take() {
            for entry in record.all_entries() {
                vectorize::remove_from_corpus(&self.corpus, &entry.combined_text());
            }
            if record.entry_count() > 0 {
                info!(user = user_id, entries = record.entry_count(), "cleared user memory");
            }
        }
        *guard = Some(UserRecord::new(user_id));
        Ok(())
    }

    /// Rank the user's entries against `query` and assemble a bounded
    /// context block. A user with no entries (or an empty query) gets an
    /// explicitly empty block, not an error.
    pub fn retrieve_context(
        &self,
        user_id: &str,
        query: &str,
        k: Option<usize>,
        char_budget: Option<usize>,
    ) -> Result<ContextBlock, MemoryError> {
        validate_id(IdKind::User, user_id)?;
        let query = query.trim();
        let candidates = self.list_entries(user_id, None)?;
        if candidates.is_empty() || query.is_empty() {
            return Ok(ContextBlock::empty());
        }

        let k = k.unwrap_or(self.config.default_k);
        let budget = char_budget.unwrap_or(self.config.char_budget);
        let query_vector = vectorize::embed(&self.corpus, query);
        let (ranked, mode) = rank::rank(
            &query_vector,
            query,
            candidates,
            k,
            self.config.similarity_threshold,
        );
        Ok(context::assemble(&ranked, budget, mode))
    }

    /// Read-only profile snapshot. Unknown users get an empty profile.
    pub fn get_profile(&self, user_id: &str) -> Result<UserProfile, MemoryError> {
        validate_id(IdKind::User, user_id)?;
        let slot = self.slot(user_id);
        let mut guard = slot.lock();
        let record = self.load(&mut guard, user_id)?;
        Ok(record.profile.clone())
    }

    pub fn stats(&self) -> StoreStats {
        let map = self.users.read();
        let mut users = 0usize;
        let mut entries = 0usize;
        for slot in map.values() {
            if let Some(record) = slot.lock().as_ref() {
                let n = record.entry_count();
                if n > 0 {
                    users += 1;
                    entries += n;
                }
            }
        }
        StoreStats {
            users,
            entries,
            corpus_docs: self.corpus.doc_count(),
            corpus_terms: self.corpus.term_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> MemoryStore {
        MemoryStore::open(
            Arc::new(MemoryBackend::new()),
            Arc::new(CorpusStats::new()),
            MemoryConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn ids_are_monotonic_per_user() {
        let store = test_store();
        let a = store.store("u1", "t1", "first question", "answer").unwrap();
        let b = store.store("u1", "t2", "second question", "answer").unwrap();
        let c = store.store("u2", "t1", "other user", "answer").unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(c.id, 1, "ids are per-user, not global");
    }

    #[test]
    fn empty_query_is_rejected() {
        let store = test_store();
        let err = store.store("u1", "t1", "   ", "answer").unwrap_err();
        assert!(matches!(err, MemoryError::EmptyQuery));
    }

    #[test]
    fn empty_user_is_rejected() {
        let store = test_store();
        assert!(matches!(store.store("", "t1", "q", "a"), Err(MemoryError::EmptyUser)));
        assert!(matches!(store.get_profile(" "), Err(MemoryError::EmptyUser)));
    }

    #[test]
    fn empty_thread_is_rejected_as_validation() {
        let store = test_store();
        let err = store.store("u1", "  ", "a question", "a").unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[test]
    fn oversized_text_is_rejected() {
        let store = test_store();
        let big = "x".repeat(MAX_TEXT_LEN + 1);
        assert!(matches!(
            store.store("u1", "t1", &big, "a"),
            Err(MemoryError::TextTooLong)
        ));
    }

    #[test]
    fn list_entries_filters_by_thread() {
        let store = test_store();
        store.store("u1", "t1", "thread one question", "a").unwrap();
        store.store("u1", "t2", "thread two question", "a").unwrap();
        assert_eq!(store.list_entries("u1", None).unwrap().len(), 2);
        let t1 = store.list_entries("u1", Some("t1")).unwrap();
        assert_eq!(t1.len(), 1);
        assert_eq!(t1[0].thread_id, "t1");
    }

    #[test]
    fn unknown_user_yields_empty_everything() {
        let store = test_store();
        assert!(store.list_entries("ghost", None).unwrap().is_empty());
        assert_eq!(store.get_profile("ghost").unwrap().interaction_count, 0);
        let block = store.retrieve_context("ghost", "anything", None, None).unwrap();
        assert!(block.is_empty());
    }

    #[test]
    fn store_updates_profile_and_corpus() {
        let store = test_store();
        store.store("u1", "t1", "help with an api error", "try again").unwrap();
        let profile = store.get_profile("u1").unwrap();
        assert_eq!(profile.interaction_count, 1);
        assert!(profile.topic_frequency.contains_key("support"));
        assert!(profile.last_active.is_some());
        let stats = store.stats();
        assert_eq!(stats.corpus_docs, 1);
        assert!(stats.corpus_terms > 0);
    }

    #[test]
    fn safe_name_sanitizes() {
        assert_eq!(safe_name("user@example.com"), "user_example_com");
        assert_eq!(safe_name("simple123"), "simple123");
    }
}
