// ── PassGFW Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the core, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain, matching the vocabulary of spec §7.
//   • `From` impls below wire std/external error conversions where `?` needs them.
//   • No variant carries key material or raw challenge plaintext in its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PassGfwError {
    /// HTTP call failed or returned a non-2xx status (spec kind: `TransportError`).
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body was not JSON, or was missing a required field
    /// (spec kind: `MalformedResponse`).
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// RSA-PSS verification of the signed subset failed (spec kind: `SignatureInvalid`).
    #[error("signature invalid")]
    SignatureInvalid,

    /// Echoed nonce did not bytewise match the nonce that was sent
    /// (spec kind: `NonceMismatch`).
    #[error("nonce mismatch — possible forged or replayed response")]
    NonceMismatch,

    /// Challenge plaintext exceeds the RSA-OAEP capacity for the loaded key
    /// (spec kind: `PayloadTooLarge`).
    #[error("challenge payload too large for RSA-OAEP ({0} bytes)")]
    PayloadTooLarge(usize),

    /// The embedded public key PEM failed to parse (spec kind: `MalformedKey`).
    #[error("malformed public key: {0}")]
    MalformedKey(String),

    /// The platform's cryptographic RNG is unavailable.
    #[error("random number generator unavailable: {0}")]
    RngUnavailable(String),

    /// Secure-storage (keychain / encrypted blob) read or write failed
    /// (spec kind: `StoreIOError`).
    #[error("store I/O error: {0}")]
    StoreIo(String),

    /// No list-parser strategy produced at least one well-formed entry
    /// (spec kind: `ListParseError`).
    #[error("no parser strategy produced candidate entries")]
    ListParse,

    /// `file` nesting exceeded `MAX_LIST_RECURSION_DEPTH` (spec kind: `RecursionLimit`).
    #[error("file recursion limit exceeded at depth {0}")]
    RecursionLimit(u32),

    /// Entry `method` was not one of the known values (spec kind: `UnknownMethod`).
    #[error("unknown candidate method: {0}")]
    UnknownMethod(String),

    /// Catch-all for conditions without a dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for PassGfwError {
    fn from(e: reqwest::Error) -> Self {
        PassGfwError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for PassGfwError {
    fn from(e: serde_json::Error) -> Self {
        PassGfwError::MalformedResponse(e.to_string())
    }
}

impl From<rsa::Error> for PassGfwError {
    fn from(e: rsa::Error) -> Self {
        PassGfwError::MalformedKey(e.to_string())
    }
}

impl From<keyring::Error> for PassGfwError {
    fn from(e: keyring::Error) -> Self {
        PassGfwError::StoreIo(e.to_string())
    }
}

impl From<std::io::Error> for PassGfwError {
    fn from(e: std::io::Error) -> Self {
        PassGfwError::StoreIo(e.to_string())
    }
}

/// All core operations return this type.
pub type PassGfwResult<T> = Result<T, PassGfwError>;
