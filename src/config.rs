// ── PassGFW Config: Build-Time Injection (spec §6.5) ───────────────────────
// Consumes the constants `build.rs` generated from `build_config.json`:
// the embedded RSA public key, the seed candidate list, and every numeric
// knob named in spec §5/§8. Nothing in this module does its own codegen —
// that lives entirely in `build.rs`.

use std::sync::LazyLock;

use crate::model::CandidateEntry;

include!(concat!(env!("OUT_DIR"), "/generated_config.rs"));

/// The compiled-in seed candidate list (spec §6.5 `BUILTIN_URLS`), parsed once.
/// Falls back to an empty list if `BUILTIN_URLS_JSON` fails to parse — the
/// store then simply starts empty rather than panicking at load time.
pub static BUILTIN_URLS: LazyLock<Vec<CandidateEntry>> = LazyLock::new(|| {
    serde_json::from_str(BUILTIN_URLS_JSON).unwrap_or_else(|e| {
        log::warn!("[config] BUILTIN_URLS_JSON failed to parse: {e}");
        Vec::new()
    })
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_knobs_match_spec_defaults() {
        assert_eq!(MAX_REDIRECTS, 10);
        assert_eq!(NONCE_LEN, 32);
        assert_eq!(CLIENT_DATA_MAX_BYTES, 200);
        assert_eq!(MAX_LIST_RECURSION_DEPTH, 5);
        assert_eq!(MAX_RETRIES, 2);
        assert_eq!(CONCURRENT_CHECK_COUNT, 3);
    }

    #[test]
    fn builtin_urls_parses_without_panicking() {
        let _ = &*BUILTIN_URLS;
    }
}
