// ── PassGFW Resolver / Executor (C7) ───────────────────────────────────────
// Method-dispatch loop over an ordered, heterogeneous candidate list, with
// bounded recursion, deduplication, and a cache of the last successful result
// (spec §4.7, §5, §9).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::atoms::error::PassGfwError;
use crate::config::{
    CONCURRENT_CHECK_COUNT, MAX_LIST_RECURSION_DEPTH, MAX_RETRIES, RETRY_DELAY_MS,
    RETRY_INTERVAL_MS, URL_INTERVAL_MS,
};
use crate::crypto::CryptoContext;
use crate::dynamic_urls;
use crate::http::HttpTransport;
use crate::list_parser::parse_candidate_list;
use crate::model::{CandidateEntry, Method};
use crate::platform::BrowserOpener;
use crate::protocol::{build_request, verify_response, ResolvedResult};
use crate::store::CandidateStore;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Construction parameters for a `Resolver` (spec §3.3, §4.9, §6.5).
pub struct ResolverConfig {
    pub public_key_pem: String,
    pub os: String,
    pub app: String,
    pub http: Arc<dyn HttpTransport>,
    pub store: CandidateStore,
    pub browser: Arc<dyn BrowserOpener>,
    /// Enable the optional batched concurrent mode for `api` entries (spec §5).
    pub concurrent: bool,
}

impl ResolverConfig {
    /// Build a config that trusts the build-time embedded public key (spec
    /// §6.5 `PUBLIC_KEY`) instead of requiring every caller to supply one by
    /// hand. Equivalent to filling in `public_key_pem` from
    /// `crate::config::PUBLIC_KEY_PEM` and constructing the struct directly;
    /// use the struct literal instead when a non-default key is needed (e.g.
    /// tests signing with their own throwaway keypair).
    pub fn with_embedded_key(
        os: String,
        app: String,
        http: Arc<dyn HttpTransport>,
        store: CandidateStore,
        browser: Arc<dyn BrowserOpener>,
        concurrent: bool,
    ) -> Self {
        Self {
            public_key_pem: crate::config::PUBLIC_KEY_PEM.to_string(),
            os,
            app,
            http,
            store,
            browser,
            concurrent,
        }
    }
}

/// Outcome of probing a single `api` entry, before the caller decides whether
/// to record it / apply its directives (kept separate so the same probe logic
/// serves both the sequential and the batched-concurrent code paths).
struct ProbeOutcome {
    resolved: ResolvedResult,
    urls: Option<Vec<CandidateEntry>>,
}

pub struct Resolver {
    crypto: CryptoContext,
    os: String,
    app: String,
    http: Arc<dyn HttpTransport>,
    store: CandidateStore,
    browser: Arc<dyn BrowserOpener>,
    concurrent: bool,

    /// Single-slot cache of the last successful result (spec §3.3, §4.7).
    cache: Mutex<Option<ResolvedResult>>,
    /// Diagnostic string for the most recent failed pass (spec: `LastError`).
    last_error: Mutex<Option<String>>,
    /// URLs already opened via `navigate`, for the lifetime of this resolver
    /// instance (spec §4.7, §5, §8.1 property 6). Accessed only from the
    /// sequential special-method phase, so a plain mutex with no `.await`
    /// inside the critical section suffices.
    opened_navigate_urls: Mutex<HashSet<String>>,
}

impl Resolver {
    /// Constructs the resolver and initializes the persistent store. The only
    /// error that propagates to the caller as a construction failure is a
    /// malformed public key (spec §7 propagation policy).
    pub async fn new(config: ResolverConfig) -> Result<Self, PassGfwError> {
        let crypto = CryptoContext::load_public_key(&config.public_key_pem)?;
        config.store.init_if_needed().await?;

        Ok(Self {
            crypto,
            os: config.os,
            app: config.app,
            http: config.http,
            store: config.store,
            browser: config.browser,
            concurrent: config.concurrent,
            cache: Mutex::new(None),
            last_error: Mutex::new(None),
            opened_navigate_urls: Mutex::new(HashSet::new()),
        })
    }

    /// Diagnostic string for the most recent failed pass. Not part of the
    /// semantic contract — for humans and logs only (spec §7).
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn set_last_error(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[resolver] {message}");
        *self.last_error.lock() = Some(message);
    }

    /// Blocking resolution. `retry = false` returns a cached successful result
    /// immediately without any network I/O, if one exists; `retry = true`
    /// invalidates the cache and performs a fresh pass. In the steady state
    /// this loops — sleeping `RETRY_INTERVAL` between passes — until a
    /// candidate succeeds, because callers use the result as a precondition
    /// for application traffic (spec §4.7, §9). Wrap the call in
    /// `tokio::time::timeout` for a deadline (spec §5 "Cancellation/timeout").
    pub async fn resolve(&self, retry: bool, client_data: Option<&str>) -> Option<ResolvedResult> {
        if !retry {
            if let Some(cached) = self.cache.lock().clone() {
                return Some(cached);
            }
        } else {
            *self.cache.lock() = None;
        }

        loop {
            if let Some(result) = self.run_one_pass(client_data).await {
                *self.cache.lock() = Some(result.clone());
                return Some(result);
            }
            tokio::time::sleep(std::time::Duration::from_millis(RETRY_INTERVAL_MS)).await;
        }
    }

    /// One traversal of the sorted entry list (spec §4.7 steps 1–2, §9: exposed
    /// separately so tests can drive a single pass without looping).
    pub async fn run_one_pass(&self, client_data: Option<&str>) -> Option<ResolvedResult> {
        let entries = self.store.sorted().await;
        if entries.is_empty() {
            self.set_last_error("candidate list is empty");
            return None;
        }

        let mut dedup = HashSet::new();
        if self.concurrent {
            self.process_concurrent(&entries, client_data, &mut dedup).await
        } else {
            self.process_sequential(&entries, 0, client_data, &mut dedup).await
        }
    }

    /// Fully sequential dispatch, honouring `URL_INTERVAL` between entries and
    /// recursing into `file` lists up to `MAX_LIST_RECURSION_DEPTH` (spec
    /// §4.7 step 2, §3.2 invariant 6).
    async fn process_sequential(
        &self,
        entries: &[CandidateEntry],
        depth: u32,
        client_data: Option<&str>,
        dedup: &mut HashSet<String>,
    ) -> Option<ResolvedResult> {
        for (i, entry) in entries.iter().enumerate() {
            if !dedup.insert(entry.url.clone()) {
                continue;
            }
            if !entry.has_valid_scheme() {
                self.set_last_error(format!("entry has a non-http(s) url, skipping: {}", entry.url));
                continue;
            }
            if i > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(URL_INTERVAL_MS)).await;
            }
            if let Some(result) = self.dispatch_one(entry, depth, client_data, dedup).await {
                return Some(result);
            }
        }
        None
    }

    /// Batched concurrent mode (spec §5): `navigate`/`remove` run sequentially
    /// and in list order first (never concurrently with each other or with
    /// anything else); the remaining `api` entries are grouped into batches
    /// of `CONCURRENT_CHECK_COUNT` and raced, with `file` entries kept
    /// singleton (sequential) because each may recurse.
    async fn process_concurrent(
        &self,
        entries: &[CandidateEntry],
        client_data: Option<&str>,
        dedup: &mut HashSet<String>,
    ) -> Option<ResolvedResult> {
        let mut batchable = Vec::new();
        for entry in entries {
            if !dedup.insert(entry.url.clone()) {
                continue;
            }
            if !entry.has_valid_scheme() {
                self.set_last_error(format!("entry has a non-http(s) url, skipping: {}", entry.url));
                continue;
            }
            match &entry.method {
                Method::Navigate | Method::Remove => {
                    self.dispatch_special(entry).await;
                }
                _ => batchable.push(entry.clone()),
            }
        }

        let mut batch = Vec::new();
        for entry in batchable {
            if matches!(entry.method, Method::File) {
                if !batch.is_empty() {
                    if let Some(result) = self.run_batch(&batch, client_data).await {
                        return Some(result);
                    }
                    batch.clear();
                }
                if let Some(result) = self.dispatch_one(&entry, 0, client_data, dedup).await {
                    return Some(result);
                }
                continue;
            }
            batch.push(entry);
            if batch.len() >= CONCURRENT_CHECK_COUNT {
                if let Some(result) = self.run_batch(&batch, client_data).await {
                    return Some(result);
                }
                batch.clear();
            }
        }
        if !batch.is_empty() {
            if let Some(result) = self.run_batch(&batch, client_data).await {
                return Some(result);
            }
        }
        None
    }

    /// Race one batch of `api` entries. The first success (in original list
    /// order among those that succeeded) wins; other in-flight probes are
    /// allowed to complete for statistics (spec §5, Open Question 5: both
    /// winner and completed losers record their real outcome).
    async fn run_batch(&self, batch: &[CandidateEntry], client_data: Option<&str>) -> Option<ResolvedResult> {
        let futures = batch.iter().map(|entry| self.probe_api_with_retries(entry, client_data));
        let outcomes = futures::future::join_all(futures).await;

        let mut winner: Option<(usize, ProbeOutcome)> = None;
        for (idx, (entry, outcome)) in batch.iter().zip(outcomes.into_iter()).enumerate() {
            match outcome {
                Some(outcome) => {
                    self.record_success_background(entry.clone());
                    if winner.is_none() {
                        winner = Some((idx, outcome));
                    }
                }
                None => self.record_failure_background(entry.url.clone()),
            }
        }

        let (_, outcome) = winner?;
        self.finish_success(outcome).await
    }

    /// Dispatch `navigate`/`remove` only (used by the concurrent mode's
    /// sequential pre-pass; these methods never produce a `ResolvedResult`).
    async fn dispatch_special(&self, entry: &CandidateEntry) {
        match &entry.method {
            Method::Navigate => self.navigate_once(&entry.url),
            Method::Remove => {
                self.store.remove(&entry.url).await;
            }
            _ => {}
        }
    }

    fn navigate_once(&self, url: &str) {
        let mut opened = self.opened_navigate_urls.lock();
        if opened.insert(url.to_string()) {
            self.browser.open(url);
        }
    }

    /// Dispatch a single entry by method (spec §4.7 step 2).
    async fn dispatch_one(
        &self,
        entry: &CandidateEntry,
        depth: u32,
        client_data: Option<&str>,
        dedup: &mut HashSet<String>,
    ) -> Option<ResolvedResult> {
        if !entry.has_valid_scheme() {
            self.set_last_error(format!("entry has a non-http(s) url, skipping: {}", entry.url));
            return None;
        }
        match &entry.method {
            Method::Api => {
                let outcome = self.probe_api_with_retries(entry, client_data).await;
                match outcome {
                    Some(outcome) => {
                        self.record_success_background(entry.clone());
                        self.finish_success(outcome).await
                    }
                    None => {
                        self.record_failure_background(entry.url.clone());
                        None
                    }
                }
            }
            Method::File => self.dispatch_file(entry, depth, client_data, dedup).await,
            Method::Navigate => {
                self.navigate_once(&entry.url);
                None
            }
            Method::Remove => {
                self.store.remove(&entry.url).await;
                None
            }
            Method::Unknown(method) => {
                self.set_last_error(PassGfwError::UnknownMethod(method.clone()).to_string());
                None
            }
        }
    }

    async fn dispatch_file(
        &self,
        entry: &CandidateEntry,
        depth: u32,
        client_data: Option<&str>,
        dedup: &mut HashSet<String>,
    ) -> Option<ResolvedResult> {
        let response = self.http.get(&entry.url).await;
        if !response.success {
            self.set_last_error(format!(
                "file fetch failed for {}: {}",
                entry.url,
                response.error.unwrap_or_default()
            ));
            return None;
        }

        if entry.store {
            // Only the file URL itself is stored, not the entries it produces
            // (spec §9 Open Question 3: provenance preserved, children remain
            // ephemeral unless they individually carry `store=true`).
            self.store.add(entry.clone().without_store_flag()).await;
        }

        let body = response.body_as_str();
        let parsed = parse_candidate_list(&body);
        if parsed.is_empty() {
            self.set_last_error(format!("{} ({})", PassGfwError::ListParse, entry.url));
            return None;
        }

        if depth + 1 > MAX_LIST_RECURSION_DEPTH {
            self.set_last_error(format!(
                "{} ({})",
                PassGfwError::RecursionLimit(depth + 1),
                entry.url
            ));
            return None;
        }

        Box::pin(self.process_sequential(&parsed, depth + 1, client_data, dedup)).await
    }

    /// One attempt with up to `MAX_RETRIES` inner tries spaced by
    /// `RETRY_DELAY` (spec §4.7 step 2 "api").
    async fn probe_api_with_retries(&self, entry: &CandidateEntry, client_data: Option<&str>) -> Option<ProbeOutcome> {
        for attempt in 0..=MAX_RETRIES {
            match self.probe_once(entry, client_data).await {
                Ok(outcome) => return Some(outcome),
                Err(e) => {
                    self.set_last_error(format!("probe of {} failed (attempt {attempt}): {e}", entry.url));
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }
        None
    }

    async fn probe_once(&self, entry: &CandidateEntry, client_data: Option<&str>) -> Result<ProbeOutcome, PassGfwError> {
        let (ciphertext, nonce) = build_request(&self.crypto, &self.os, &self.app, client_data)?;
        let response = self.http.post(&entry.url, ciphertext, "application/octet-stream").await;
        if !response.success {
            return Err(PassGfwError::Transport(
                response.error.unwrap_or_else(|| format!("HTTP {}", response.status_code)),
            ));
        }
        let verified = verify_response(&self.crypto, &response.body, &nonce)?;
        Ok(ProbeOutcome { resolved: verified.resolved, urls: verified.urls })
    }

    /// Common tail of a successful probe: apply any `urls` directives, then
    /// hand the resolved result back (spec §4.6 "the resolver receives
    /// `(resolved, urlsDirectivesIfAny)`", §4.8).
    async fn finish_success(&self, outcome: ProbeOutcome) -> Option<ResolvedResult> {
        if let Some(urls) = &outcome.urls {
            let mut opened = self.opened_navigate_urls.lock().clone();
            dynamic_urls::apply_directives(&self.store, self.browser.as_ref(), &mut opened, urls).await;
            *self.opened_navigate_urls.lock() = opened;
        }
        Some(outcome.resolved)
    }

    fn record_success_background(&self, entry: CandidateEntry) {
        // spawned so the happy path is never blocked by disk/crypto I/O
        // (spec §2, §5 "store-on-success write").
        let store = self.store.clone();
        tokio::spawn(async move {
            store.record_success(&entry.url, now_ms()).await;
        });
    }

    fn record_failure_background(&self, url: String) {
        let store = self.store.clone();
        tokio::spawn(async move {
            store.record_failure(&url, now_ms()).await;
        });
    }
}
