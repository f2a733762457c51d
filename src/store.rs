// ── PassGFW Persistent Candidate Store (C4) ────────────────────────────────
// An ordered, duplicate-free list of `StoreRecord`s in an encrypted-at-rest
// keyed value, with atomic replace semantics and one exclusive lock guarding
// every read and write (spec §4.4, §3.2 invariants 1–2, §5).

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::atoms::error::{PassGfwError, PassGfwResult};
use crate::config::BUILTIN_URLS;
use crate::model::{CandidateEntry, EntryStatus, StoreRecord};
use crate::platform::SecureStorage;

/// Key namespace the store owns in the platform's keyed storage (spec §6.4).
const STORE_KEY: &str = "passgfw.urls";

/// Legacy plaintext file migrated in on first run (spec §4.4, §6.4).
const LEGACY_FILE_NAME: &str = "passgfw_urls.json";

#[derive(Clone)]
pub struct CandidateStore {
    storage: Arc<dyn SecureStorage>,
    legacy_dir: std::path::PathBuf,
    /// Single exclusive lock guarding List/Sorted/Add/Remove/Record*/Reset
    /// (spec §5 "Shared resources"). `tokio::sync::Mutex` so store operations
    /// compose naturally with the rest of this crate's async call graph
    /// (resolver passes, background store-on-success writes) without a
    /// blocking-mutex-across-await hazard if a future `SecureStorage` impl
    /// ever needs to await (e.g. a networked keystore). Wrapped in `Arc` so
    /// cloning a `CandidateStore` handle (one per background task) still
    /// guards the same critical section.
    lock: Arc<Mutex<()>>,
}

impl CandidateStore {
    pub fn new(storage: Arc<dyn SecureStorage>, legacy_dir: std::path::PathBuf) -> Self {
        Self { storage, legacy_dir, lock: Arc::new(Mutex::new(())) }
    }

    /// Opens the store rooted at the platform's conventional documents/app-support
    /// directory for legacy-file migration (spec §6.4).
    pub fn with_default_legacy_dir(storage: Arc<dyn SecureStorage>) -> Self {
        let dir = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        Self::new(storage, dir)
    }

    fn legacy_path(&self) -> std::path::PathBuf {
        self.legacy_dir.join(LEGACY_FILE_NAME)
    }

    fn decode(&self, bytes: &[u8]) -> PassGfwResult<Vec<StoreRecord>> {
        serde_json::from_slice(bytes).map_err(PassGfwError::from)
    }

    fn encode(records: &[StoreRecord]) -> PassGfwResult<Vec<u8>> {
        serde_json::to_vec(records).map_err(PassGfwError::from)
    }

    /// `SecureStorage` is a synchronous contract (keychain calls, file I/O,
    /// AES-GCM) — run it on the blocking thread pool so it never stalls the
    /// async executor while the caller holds `self.lock` (teacher pattern,
    /// `engine/web.rs`: "Browser ops are blocking — run in spawn_blocking").
    async fn read_locked(&self) -> Vec<StoreRecord> {
        let storage = self.storage.clone();
        let loaded = tokio::task::spawn_blocking(move || storage.load(STORE_KEY))
            .await
            .unwrap_or(None);
        match loaded {
            Some(bytes) => self.decode(&bytes).unwrap_or_else(|e| {
                log::warn!("[store] stored value failed to decode: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    async fn write_locked(&self, records: &[StoreRecord]) -> bool {
        match Self::encode(records) {
            Ok(bytes) => {
                let storage = self.storage.clone();
                tokio::task::spawn_blocking(move || storage.save(STORE_KEY, &bytes))
                    .await
                    .unwrap_or(false)
            }
            Err(e) => {
                log::warn!("[store] failed to encode records for write: {e}");
                false
            }
        }
    }

    /// If the key already exists, return. Else attempt legacy migration; if no
    /// legacy file is found, seed the compiled-in default list (spec §4.4).
    pub async fn init_if_needed(&self) -> PassGfwResult<()> {
        let _guard = self.lock.lock().await;

        let storage = self.storage.clone();
        let already_present = tokio::task::spawn_blocking(move || storage.load(STORE_KEY).is_some())
            .await
            .unwrap_or(false);
        if already_present {
            return Ok(());
        }

        let legacy_path = self.legacy_path();
        let read_path = legacy_path.clone();
        let legacy_raw = tokio::task::spawn_blocking(move || std::fs::read_to_string(&read_path))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)));

        match legacy_raw {
            Ok(raw) => match parse_legacy(&raw) {
                Ok(records) => {
                    let expected = records.len();
                    if self.write_locked(&records).await {
                        let round_tripped = self.read_locked().await.len();
                        if round_tripped == expected {
                            let delete_path = legacy_path.clone();
                            let deleted = tokio::task::spawn_blocking(move || std::fs::remove_file(&delete_path))
                                .await
                                .unwrap_or_else(|e| Err(std::io::Error::other(e)));
                            if let Err(e) = deleted {
                                log::warn!(
                                    "[store] migrated {expected} legacy entries but failed to delete {}: {e}",
                                    legacy_path.display()
                                );
                            } else {
                                log::info!("[store] migrated {expected} legacy entries, deleted plaintext file");
                            }
                        } else {
                            log::error!(
                                "[store] legacy migration round-trip mismatch ({round_tripped} != {expected}) — preserving plaintext file"
                            );
                        }
                    } else {
                        log::error!("[store] legacy migration write failed — preserving plaintext file");
                    }
                    Ok(())
                }
                Err(e) => {
                    log::error!("[store] legacy file is present but invalid ({e}) — preserving it, seeding defaults");
                    self.write_locked(&default_records()).await;
                    Ok(())
                }
            },
            Err(_) => {
                // No legacy file: seed the compiled-in defaults.
                self.write_locked(&default_records()).await;
                Ok(())
            }
        }
    }

    /// Decode under lock (spec: `List`).
    pub async fn list(&self) -> Vec<StoreRecord> {
        let _guard = self.lock.lock().await;
        self.read_locked().await
    }

    /// Ordered by status bucket (success < untested < failed), then
    /// `success_count` descending, then `last_success` descending. Ties keep
    /// insertion order (spec: `Sorted`).
    pub async fn sorted(&self) -> Vec<CandidateEntry> {
        let mut records = self.list().await;
        records.sort_by(|a, b| {
            status_rank(a.stats.status)
                .cmp(&status_rank(b.stats.status))
                .then_with(|| b.stats.success_count.cmp(&a.stats.success_count))
                .then_with(|| b.stats.last_success.unwrap_or(i64::MIN).cmp(&a.stats.last_success.unwrap_or(i64::MIN)))
        });
        records.into_iter().map(|r| r.entry).collect()
    }

    /// No-op if `entry.url` is already present; otherwise append with
    /// untested stats (spec: `Add`). Returns whether the write succeeded.
    pub async fn add(&self, entry: CandidateEntry) -> bool {
        let _guard = self.lock.lock().await;
        let mut records = self.read_locked().await;
        if records.iter().any(|r| r.entry.url == entry.url) {
            return true;
        }
        records.push(StoreRecord::new_untested(entry));
        self.write_locked(&records).await
    }

    /// Drop the matching record; returns success even if absent (spec: `Remove`).
    pub async fn remove(&self, url: &str) -> bool {
        let _guard = self.lock.lock().await;
        let mut records = self.read_locked().await;
        let before = records.len();
        records.retain(|r| r.entry.url != url);
        if records.len() == before {
            return true;
        }
        self.write_locked(&records).await
    }

    /// Atomically update stats after a successful probe (spec: `RecordSuccess`).
    pub async fn record_success(&self, url: &str, now_ms: i64) -> bool {
        let _guard = self.lock.lock().await;
        let mut records = self.read_locked().await;
        let Some(record) = records.iter_mut().find(|r| r.entry.url == url) else {
            return true;
        };
        record.stats.status = EntryStatus::Success;
        record.stats.success_count += 1;
        record.stats.last_tested = Some(now_ms);
        record.stats.last_success = Some(now_ms);
        self.write_locked(&records).await
    }

    /// Atomically update stats after a failed probe (spec: `RecordFailure`).
    pub async fn record_failure(&self, url: &str, now_ms: i64) -> bool {
        let _guard = self.lock.lock().await;
        let mut records = self.read_locked().await;
        let Some(record) = records.iter_mut().find(|r| r.entry.url == url) else {
            return true;
        };
        record.stats.status = EntryStatus::Failed;
        record.stats.failure_count += 1;
        record.stats.last_tested = Some(now_ms);
        self.write_locked(&records).await
    }

    /// Replace the entire list with the compiled-in defaults (spec: `Reset`).
    pub async fn reset(&self) -> bool {
        let _guard = self.lock.lock().await;
        self.write_locked(&default_records()).await
    }
}

fn status_rank(status: EntryStatus) -> u8 {
    match status {
        EntryStatus::Success => 0,
        EntryStatus::Untested => 1,
        EntryStatus::Failed => 2,
    }
}

fn default_records() -> Vec<StoreRecord> {
    BUILTIN_URLS.iter().cloned().map(StoreRecord::new_untested).collect()
}

/// Legacy files may hold either a bare `[]CandidateEntry` (oldest format) or
/// the full `[]StoreRecord` shape; accept either.
fn parse_legacy(raw: &str) -> PassGfwResult<Vec<StoreRecord>> {
    if let Ok(records) = serde_json::from_str::<Vec<StoreRecord>>(raw) {
        return Ok(records);
    }
    let entries: Vec<CandidateEntry> = serde_json::from_str(raw)?;
    Ok(entries.into_iter().map(StoreRecord::new_untested).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Method;
    use crate::platform::test_support::InMemorySecureStorage;

    fn store() -> CandidateStore {
        CandidateStore::new(Arc::new(InMemorySecureStorage::default()), std::env::temp_dir().join("passgfw-test-empty"))
    }

    #[tokio::test]
    async fn init_if_needed_seeds_builtins_once() {
        let s = store();
        s.init_if_needed().await.unwrap();
        let first = s.list().await.len();
        s.init_if_needed().await.unwrap();
        assert_eq!(s.list().await.len(), first);
    }

    #[tokio::test]
    async fn add_is_idempotent_per_url() {
        let s = store();
        let entry = CandidateEntry::new(Method::Api, "https://dup/check");
        assert!(s.add(entry.clone()).await);
        assert!(s.add(entry).await);
        let records = s.list().await;
        assert_eq!(records.iter().filter(|r| r.entry.url == "https://dup/check").count(), 1);
    }

    #[tokio::test]
    async fn remove_succeeds_even_if_absent() {
        let s = store();
        assert!(s.remove("https://nowhere/check").await);
    }

    #[tokio::test]
    async fn record_success_and_failure_update_stats() {
        let s = store();
        s.add(CandidateEntry::new(Method::Api, "https://a/check")).await;
        assert!(s.record_success("https://a/check", 1_000).await);
        let records = s.list().await;
        let rec = records.iter().find(|r| r.entry.url == "https://a/check").unwrap();
        assert_eq!(rec.stats.status, EntryStatus::Success);
        assert_eq!(rec.stats.success_count, 1);
        assert_eq!(rec.stats.last_success, Some(1_000));
        assert!(rec.stats.is_well_formed());
    }

    #[tokio::test]
    async fn sorted_ranks_success_before_untested_before_failed() {
        let s = store();
        s.add(CandidateEntry::new(Method::Api, "https://fail/check")).await;
        s.add(CandidateEntry::new(Method::Api, "https://untested/check")).await;
        s.add(CandidateEntry::new(Method::Api, "https://ok/check")).await;
        s.record_failure("https://fail/check", 1).await;
        s.record_success("https://ok/check", 2).await;
        let order: Vec<String> = s.sorted().await.into_iter().map(|e| e.url).collect();
        assert_eq!(order, vec!["https://ok/check", "https://untested/check", "https://fail/check"]);
    }

    #[tokio::test]
    async fn reset_restores_builtin_defaults() {
        let s = store();
        s.add(CandidateEntry::new(Method::Api, "https://extra/check")).await;
        assert!(s.reset().await);
        let urls: Vec<String> = s.list().await.into_iter().map(|r| r.entry.url).collect();
        assert!(!urls.contains(&"https://extra/check".to_string()));
    }

    /// Many tasks hammering `Add`/`RecordSuccess`/`RecordFailure` concurrently
    /// against the same handle must never produce duplicates, lost entries, or
    /// stat inversions (spec §8.1 property 7) — the single exclusive lock
    /// serializes every read-modify-write.
    #[tokio::test]
    async fn concurrent_add_and_record_never_corrupts_the_store() {
        let s = store();
        let mut handles = Vec::new();
        for i in 0..20 {
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                let url = format!("https://c{}/check", i % 5);
                s.add(CandidateEntry::new(Method::Api, url.clone())).await;
                if i % 2 == 0 {
                    s.record_success(&url, i as i64).await;
                } else {
                    s.record_failure(&url, i as i64).await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let records = s.list().await;
        let urls: Vec<&str> = records.iter().map(|r| r.entry.url.as_str()).collect();
        let mut unique = urls.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(urls.len(), unique.len(), "no duplicate URLs after concurrent adds");
        assert_eq!(unique.len(), 5, "all five distinct URLs survived");
        for record in &records {
            assert!(record.stats.is_well_formed(), "stats must never be left inverted: {:?}", record.stats);
        }
    }

    #[tokio::test]
    async fn legacy_migration_round_trips_and_deletes_plaintext() {
        let dir = std::env::temp_dir().join(format!("passgfw-legacy-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let legacy_path = dir.join(LEGACY_FILE_NAME);
        std::fs::write(
            &legacy_path,
            r#"[{"method":"api","url":"https://legacy1/check"},{"method":"api","url":"https://legacy2/check"}]"#,
        )
        .unwrap();

        let s = CandidateStore::new(Arc::new(InMemorySecureStorage::default()), dir.clone());
        s.init_if_needed().await.unwrap();

        let urls: Vec<String> = s.list().await.into_iter().map(|r| r.entry.url).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls.contains(&"https://legacy1/check".to_string()));
        assert!(!legacy_path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
