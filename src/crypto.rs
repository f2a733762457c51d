// ── PassGFW Crypto Primitives (C1) ─────────────────────────────────────────
// RSA key parsing, cryptographic random generation, OAEP encrypt, PSS verify.
// spec §4.1. Nothing in this module ever logs key material or plaintext.

use rand_core::OsRng as CryptoOsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::pss::{Signature as PssSignature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;

use crate::atoms::error::{PassGfwError, PassGfwResult};

/// RSA-OAEP-SHA256 over a 2048-bit key leaves `k - 2*hLen - 2` plaintext bytes,
/// where `k = 256` (2048 bits) and `hLen = 32` (SHA-256): 256 - 64 - 2 = 190.
pub const MAX_OAEP_PLAINTEXT_BYTES: usize = 190;

/// Length in bytes of every probe nonce (spec §3.1, §4.1). Traces to the
/// build-time knob `crate::config::NONCE_LEN` (spec §6.5) so editing
/// `build_config.json` actually changes the nonce length the crypto layer
/// enforces.
pub const NONCE_BYTES: usize = crate::config::NONCE_LEN;

/// Holds the build-time embedded RSA public key and exposes the four C1
/// operations (spec §4.1). Immutable after construction — §3.2 invariant 4.
#[derive(Clone)]
pub struct CryptoContext {
    public_key: RsaPublicKey,
}

impl CryptoContext {
    /// Parse a PEM-wrapped RSA public key (spec: `LoadPublicKey`).
    ///
    /// Strips whitespace implicitly via the PKCS#8 PEM decoder, which also
    /// validates the BEGIN/END framing; any deviation fails with `MalformedKey`.
    pub fn load_public_key(pem: &str) -> PassGfwResult<Self> {
        let public_key = RsaPublicKey::from_public_key_pem(pem.trim())
            .map_err(|e| PassGfwError::MalformedKey(e.to_string()))?;
        Ok(Self { public_key })
    }

    /// Draw cryptographically strong random bytes (spec: `RandomBytes`).
    pub fn random_bytes(n: usize) -> PassGfwResult<Vec<u8>> {
        use rand_core::RngCore;
        let mut buf = vec![0u8; n];
        CryptoOsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| PassGfwError::RngUnavailable(e.to_string()))?;
        Ok(buf)
    }

    /// Draw a fresh 32-byte nonce (spec §3.2 invariant 5: never reused).
    pub fn random_nonce() -> PassGfwResult<[u8; NONCE_BYTES]> {
        let bytes = Self::random_bytes(NONCE_BYTES)?;
        bytes.try_into().map_err(|_| {
            PassGfwError::Other("random_bytes returned an unexpected length".to_string())
        })
    }

    /// RSA-OAEP-SHA256 encrypt. Fails with `PayloadTooLarge` if `plain` exceeds
    /// `MAX_OAEP_PLAINTEXT_BYTES` (spec: `Encrypt`).
    pub fn encrypt(&self, plain: &[u8]) -> PassGfwResult<Vec<u8>> {
        if plain.len() > MAX_OAEP_PLAINTEXT_BYTES {
            return Err(PassGfwError::PayloadTooLarge(plain.len()));
        }
        self.public_key
            .encrypt(&mut CryptoOsRng, Oaep::new::<Sha256>(), plain)
            .map_err(|e| PassGfwError::Other(format!("OAEP encrypt failed: {e}")))
    }

    /// RSA-PSS-SHA256 verify with salt length equal to the hash length (32
    /// bytes). Returns `false` on any mismatch or malformed signature — never
    /// propagates an error (spec: `Verify` "never throws").
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let verifying_key = VerifyingKey::<Sha256>::new(self.public_key.clone());
        let Ok(sig) = PssSignature::try_from(signature) else {
            return false;
        };
        verifying_key.verify(message, &sig).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::RsaPrivateKey;

    fn test_keypair() -> (RsaPrivateKey, CryptoContext) {
        let priv_key = RsaPrivateKey::new(&mut CryptoOsRng, 2048).expect("keygen");
        let pub_key = priv_key.to_public_key();
        let pem = pub_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .expect("pem encode");
        (priv_key, CryptoContext::load_public_key(&pem).expect("load"))
    }

    #[test]
    fn load_public_key_rejects_garbage() {
        assert!(CryptoContext::load_public_key("not a key").is_err());
    }

    #[test]
    fn random_nonce_is_32_bytes_and_varies() {
        let a = CryptoContext::random_nonce().unwrap();
        let b = CryptoContext::random_nonce().unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn encrypt_rejects_oversized_plaintext() {
        let (_priv, ctx) = test_keypair();
        let too_big = vec![0u8; MAX_OAEP_PLAINTEXT_BYTES + 1];
        assert!(matches!(
            ctx.encrypt(&too_big),
            Err(PassGfwError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let (priv_key, ctx) = test_keypair();
        let plain = b"hello passgfw";
        let cipher = ctx.encrypt(plain).unwrap();
        let decrypted = priv_key.decrypt(Oaep::new::<Sha256>(), &cipher).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn verify_accepts_genuine_signature_and_rejects_tampering() {
        let (priv_key, ctx) = test_keypair();
        use rsa::pss::SigningKey;
        use rsa::signature::{RandomizedSigner, Signature as _};

        let signing_key = SigningKey::<Sha256>::new(priv_key);
        let message = b"the signed subset";
        let sig = signing_key.sign_with_rng(&mut CryptoOsRng, message);

        assert!(ctx.verify(message, sig.as_bytes()));
        assert!(!ctx.verify(b"a different message", sig.as_bytes()));
        assert!(!ctx.verify(message, b"not a real signature"));
    }
}
