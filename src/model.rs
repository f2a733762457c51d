// ── PassGFW Model: Candidate Entry & Store Record (C3) ─────────────────────
// Typed record `(method, url, store, stats)` with its JSON wire codec.
//
// Codec rules (spec §4.3):
//   • Encoding omits `store = false` and any absent stat field.
//   • Decoding accepts and ignores unknown fields.
//   • `method` is canonicalised to lowercase on decode; an unrecognized method
//     string still decodes successfully (as `Method::Unknown`) so one bad entry
//     does not poison a whole candidate list (spec §4.5).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Probing instruction method (spec §3.1). Case-insensitive on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Api,
    File,
    Navigate,
    Remove,
    /// A method string not in the closed enum. Dispatch logs and skips it
    /// (spec §4.7 step 2 "any other value", §9 "tagged method dispatch").
    Unknown(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Api => "api",
            Method::File => "file",
            Method::Navigate => "navigate",
            Method::Remove => "remove",
            Method::Unknown(s) => s.as_str(),
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(match raw.to_lowercase().as_str() {
            "api" => Method::Api,
            "file" => Method::File,
            "navigate" => Method::Navigate,
            "remove" => Method::Remove,
            other => Method::Unknown(other.to_string()),
        })
    }
}

/// One probing instruction (spec §3.1 `CandidateEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEntry {
    pub method: Method,
    pub url: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub store: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl CandidateEntry {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), store: false }
    }

    /// Absolute URL with scheme `http` or `https` (spec §3.1 invariant on `url`).
    pub fn has_valid_scheme(&self) -> bool {
        url::Url::parse(&self.url)
            .map(|u| u.scheme() == "http" || u.scheme() == "https")
            .unwrap_or(false)
    }

    /// Strip the `store` flag — used before persisting an entry that succeeded
    /// (spec §3.1: "the entry is persisted ... after stripping the store flag").
    pub fn without_store_flag(mut self) -> Self {
        self.store = false;
        self
    }
}

/// Success/failure classification attached to persisted entries only
/// (spec §3.1 `EntryStats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Untested,
    Success,
    Failed,
}

impl Default for EntryStatus {
    fn default() -> Self {
        EntryStatus::Untested
    }
}

/// Statistics attached to a persisted `StoreRecord` (spec §3.1 `EntryStats`).
/// Timestamps are milliseconds since epoch; absent on entries never tested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryStats {
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tested: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<i64>,
}

impl EntryStats {
    /// Invariant 3.2.3: `status = success ⇒ success_count ≥ 1 ∧ last_success defined`.
    pub fn is_well_formed(&self) -> bool {
        match self.status {
            EntryStatus::Success => self.success_count >= 1 && self.last_success.is_some(),
            EntryStatus::Failed => self.failure_count >= 1,
            EntryStatus::Untested => true,
        }
    }
}

/// One entry in the persistent candidate store: a `CandidateEntry` augmented
/// with `EntryStats` (spec §3.1 `StoreRecord`). The store holds an ordered
/// sequence of these, keyed uniquely by `url` (invariant 3.2.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRecord {
    #[serde(flatten)]
    pub entry: CandidateEntry,
    #[serde(flatten)]
    pub stats: EntryStats,
}

impl StoreRecord {
    pub fn new_untested(entry: CandidateEntry) -> Self {
        Self { entry: entry.without_store_flag(), stats: EntryStats::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_is_case_insensitive_on_decode() {
        let v: Method = serde_json::from_str("\"API\"").unwrap();
        assert_eq!(v, Method::Api);
    }

    #[test]
    fn unknown_method_decodes_without_error() {
        let v: Method = serde_json::from_str("\"teleport\"").unwrap();
        assert_eq!(v, Method::Unknown("teleport".to_string()));
    }

    #[test]
    fn store_false_is_omitted_on_encode() {
        let entry = CandidateEntry::new(Method::Api, "https://x/y");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("store"));
    }

    #[test]
    fn store_true_is_present_on_encode() {
        let mut entry = CandidateEntry::new(Method::Api, "https://x/y");
        entry.store = true;
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"store\":true"));
    }

    #[test]
    fn absent_stats_fields_are_omitted() {
        let stats = EntryStats::default();
        let json = serde_json::to_string(&stats).unwrap();
        assert!(!json.contains("last_tested"));
        assert!(!json.contains("last_success"));
    }

    #[test]
    fn scheme_validation_rejects_non_http() {
        let entry = CandidateEntry::new(Method::Api, "ftp://x/y");
        assert!(!entry.has_valid_scheme());
        let entry = CandidateEntry::new(Method::Api, "https://x/y");
        assert!(entry.has_valid_scheme());
    }

    #[test]
    fn store_record_round_trips_through_json() {
        let mut entry = CandidateEntry::new(Method::File, "https://x/list.html");
        entry.store = true;
        let record = StoreRecord::new_untested(entry);
        let json = serde_json::to_string(&record).unwrap();
        let back: StoreRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entry.url, "https://x/list.html");
        assert!(!back.entry.store);
        assert_eq!(back.stats.status, EntryStatus::Untested);
    }
}
