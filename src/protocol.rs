// ── PassGFW Probe Protocol (C6) ─────────────────────────────────────────────
// The heart of the system: a one-round challenge/response authenticating both
// directions under the shared public key, with no pre-shared client secret
// (spec §4.6, §6.1, §6.2).

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::atoms::error::{PassGfwError, PassGfwResult};
use crate::crypto::CryptoContext;
use crate::model::CandidateEntry;

/// What the client encrypts and sends (spec §3.1 `ChallengePayload`, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengePayload {
    pub nonce: String,
    pub os: String,
    pub app: String,
    pub data: String,
}

/// What the server returns (spec §3.1 `SignedResponse`, §6.2).
#[derive(Debug, Clone, Deserialize)]
pub struct SignedResponse {
    pub nonce: String,
    pub data: String,
    #[serde(default)]
    pub urls: Option<Vec<CandidateEntry>>,
    pub signature: String,
}

/// Opaque result handed back to the caller verbatim (spec §3.1 `ResolvedResult`).
pub type ResolvedResult = Map<String, Value>;

/// Caller-supplied `data` is truncated to this many UTF-8 bytes before
/// encryption, with a warning (spec §9 Open Question 1: "truncate with a
/// warning before encryption").
pub const CLIENT_DATA_MAX_BYTES: usize = crate::config::CLIENT_DATA_MAX_BYTES;

/// Truncate `data` to `CLIENT_DATA_MAX_BYTES` UTF-8 bytes at a char boundary,
/// logging a warning if truncation occurred.
pub fn truncate_client_data(data: &str) -> String {
    if data.len() <= CLIENT_DATA_MAX_BYTES {
        return data.to_string();
    }
    let mut end = CLIENT_DATA_MAX_BYTES;
    while end > 0 && !data.is_char_boundary(end) {
        end -= 1;
    }
    log::warn!(
        "[protocol] client data ({} bytes) exceeds the {}-byte cap — truncating",
        data.len(),
        CLIENT_DATA_MAX_BYTES
    );
    data[..end].to_string()
}

/// Build the encrypted request body for one probe attempt.
///
/// Returns the raw ciphertext bytes (to POST verbatim, not base64) alongside
/// the nonce that must be bytewise-matched against the response (spec §4.6
/// steps 1–4, §3.2 invariant 5).
pub fn build_request(
    crypto: &CryptoContext,
    os: &str,
    app: &str,
    client_data: Option<&str>,
) -> PassGfwResult<(Vec<u8>, [u8; crate::crypto::NONCE_BYTES])> {
    let nonce = CryptoContext::random_nonce()?;
    let nonce_b64 = base64::engine::general_purpose::STANDARD.encode(nonce);
    let data = client_data.map(truncate_client_data).unwrap_or_default();

    let payload = ChallengePayload { nonce: nonce_b64, os: os.to_string(), app: app.to_string(), data };
    let plaintext = serde_json::to_vec(&payload)?;
    let ciphertext = crypto.encrypt(&plaintext)?;
    Ok((ciphertext, nonce))
}

/// Re-canonicalise the signed subset: `{nonce, data, urls?}` with no
/// `signature` field, keys sorted lexicographically (spec §4.6 step 3, §6.2,
/// §8.1 property 3). `serde_json::Map` is a `BTreeMap` under the hood (this
/// crate never enables the `preserve_order` feature), so inserting in any
/// order and serializing the resulting `Value::Object` always yields sorted
/// keys — the same canonical bytes regardless of the wire order the server
/// sent the fields in.
fn signed_subset_bytes(response: &SignedResponse) -> PassGfwResult<Vec<u8>> {
    let mut map = Map::new();
    map.insert("nonce".to_string(), Value::String(response.nonce.clone()));
    map.insert("data".to_string(), Value::String(response.data.clone()));
    if let Some(urls) = &response.urls {
        map.insert("urls".to_string(), serde_json::to_value(urls)?);
    }
    Ok(serde_json::to_vec(&Value::Object(map))?)
}

/// Outcome of a single verified probe (spec §4.6: "the resolver receives
/// `(resolved, urlsDirectivesIfAny)`").
pub struct VerifiedResponse {
    pub resolved: ResolvedResult,
    pub urls: Option<Vec<CandidateEntry>>,
}

/// Verify a probe response against the nonce that was sent, in the exact
/// six-point order of spec §4.6. Any failure aborts the attempt.
pub fn verify_response(
    crypto: &CryptoContext,
    body: &[u8],
    sent_nonce: &[u8],
) -> PassGfwResult<VerifiedResponse> {
    // Point 2: body parses as the expected JSON shape.
    let response: SignedResponse = serde_json::from_slice(body)
        .map_err(|e| PassGfwError::MalformedResponse(e.to_string()))?;

    // Point 3: re-canonicalise the signed subset.
    let signed_bytes = signed_subset_bytes(&response)?;

    // Point 4: PSS verification.
    let signature = base64::engine::general_purpose::STANDARD
        .decode(&response.signature)
        .map_err(|e| PassGfwError::MalformedResponse(format!("bad signature base64: {e}")))?;
    if !crypto.verify(&signed_bytes, &signature) {
        return Err(PassGfwError::SignatureInvalid);
    }

    // Point 5: nonce equality, bytewise.
    let echoed_nonce = base64::engine::general_purpose::STANDARD
        .decode(&response.nonce)
        .map_err(|e| PassGfwError::MalformedResponse(format!("bad nonce base64: {e}")))?;
    if echoed_nonce != sent_nonce {
        return Err(PassGfwError::NonceMismatch);
    }

    // Point 6: `data` decodes to a JSON object — becomes `ResolvedResult`.
    let data_bytes = base64::engine::general_purpose::STANDARD
        .decode(&response.data)
        .map_err(|e| PassGfwError::MalformedResponse(format!("bad data base64: {e}")))?;
    let resolved: ResolvedResult = serde_json::from_slice(&data_bytes)
        .map_err(|e| PassGfwError::MalformedResponse(format!("data is not a JSON object: {e}")))?;

    Ok(VerifiedResponse { resolved, urls: response.urls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Method;
    use rand_core::OsRng;
    use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
    use rsa::pss::SigningKey;
    use rsa::signature::{RandomizedSigner, Signature as _};
    use rsa::RsaPrivateKey;
    use sha2::Sha256;

    struct TestServer {
        priv_key: RsaPrivateKey,
    }

    impl TestServer {
        fn new() -> (Self, CryptoContext) {
            let priv_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
            let pub_pem = priv_key
                .to_public_key()
                .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
                .unwrap();
            let ctx = CryptoContext::load_public_key(&pub_pem).unwrap();
            (Self { priv_key }, ctx)
        }

        /// Decrypt a client request and produce a validly-signed response.
        fn handle(&self, ciphertext: &[u8], data_obj: Value, urls: Option<Vec<CandidateEntry>>) -> Vec<u8> {
            let plaintext = self
                .priv_key
                .decrypt(rsa::Oaep::new::<Sha256>(), ciphertext)
                .unwrap();
            let payload: ChallengePayload = serde_json::from_slice(&plaintext).unwrap();
            self.sign_response(&payload.nonce, data_obj, urls)
        }

        fn sign_response(&self, nonce_b64: &str, data_obj: Value, urls: Option<Vec<CandidateEntry>>) -> Vec<u8> {
            let data_b64 = base64::engine::general_purpose::STANDARD
                .encode(serde_json::to_vec(&data_obj).unwrap());

            let mut map = Map::new();
            map.insert("nonce".to_string(), Value::String(nonce_b64.to_string()));
            map.insert("data".to_string(), Value::String(data_b64.clone()));
            if let Some(u) = &urls {
                map.insert("urls".to_string(), serde_json::to_value(u).unwrap());
            }
            let signed_bytes = serde_json::to_vec(&Value::Object(map)).unwrap();

            let signing_key = SigningKey::<Sha256>::new(self.priv_key.clone());
            let sig = signing_key.sign_with_rng(&mut OsRng, &signed_bytes);
            let sig_b64 = base64::engine::general_purpose::STANDARD.encode(sig.as_bytes());

            let mut out = Map::new();
            out.insert("nonce".to_string(), Value::String(nonce_b64.to_string()));
            out.insert("data".to_string(), Value::String(data_b64));
            if let Some(u) = &urls {
                out.insert("urls".to_string(), serde_json::to_value(u).unwrap());
            }
            out.insert("signature".to_string(), Value::String(sig_b64));
            serde_json::to_vec(&Value::Object(out)).unwrap()
        }
    }

    #[test]
    fn full_round_trip_succeeds() {
        let (server, ctx) = TestServer::new();
        let (ciphertext, nonce) = build_request(&ctx, "ios", "com.example.app", Some("hello")).unwrap();
        let body = server.handle(&ciphertext, serde_json::json!({"host": "s1"}), None);
        let verified = verify_response(&ctx, &body, &nonce).unwrap();
        assert_eq!(verified.resolved.get("host").unwrap(), "s1");
        assert!(verified.urls.is_none());
    }

    #[test]
    fn nonce_mismatch_is_rejected() {
        let (server, ctx) = TestServer::new();
        let (ciphertext, _sent_nonce) = build_request(&ctx, "ios", "com.example.app", None).unwrap();
        let body = server.handle(&ciphertext, serde_json::json!({"host": "s1"}), None);
        // A nonce captured from a different exchange: the signature is genuine
        // but it does not echo *our* sent nonce (spec scenario S3).
        let other_nonce = CryptoContext::random_nonce().unwrap();
        let result = verify_response(&ctx, &body, &other_nonce);
        assert!(matches!(result, Err(PassGfwError::NonceMismatch)));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (server, ctx) = TestServer::new();
        let (ciphertext, nonce) = build_request(&ctx, "ios", "com.example.app", None).unwrap();
        let mut body = server.handle(&ciphertext, serde_json::json!({"host": "s1"}), None);
        // Flip one byte inside the signed `data` field without re-signing.
        let idx = body.len() / 2;
        body[idx] ^= 0x01;
        let result = verify_response(&ctx, &body, &nonce);
        assert!(result.is_err());
    }

    #[test]
    fn urls_directive_is_signed_and_returned() {
        let (server, ctx) = TestServer::new();
        let (ciphertext, nonce) = build_request(&ctx, "android", "com.example.app", None).unwrap();
        let directives = vec![CandidateEntry::new(Method::Remove, "https://old/check")];
        let body = server.handle(&ciphertext, serde_json::json!({}), Some(directives));
        let verified = verify_response(&ctx, &body, &nonce).unwrap();
        let urls = verified.urls.unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].url, "https://old/check");
    }

    #[test]
    fn client_data_over_cap_is_truncated() {
        let long = "x".repeat(CLIENT_DATA_MAX_BYTES + 50);
        let truncated = truncate_client_data(&long);
        assert_eq!(truncated.len(), CLIENT_DATA_MAX_BYTES);
    }

    #[test]
    fn client_data_under_cap_is_untouched() {
        let short = "hello";
        assert_eq!(truncate_client_data(short), short);
    }
}
