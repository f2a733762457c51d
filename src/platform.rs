// ── PassGFW Platform Glue Contracts (C9) ───────────────────────────────────
// The three external capability sets the core depends on (spec §4.9): secure
// storage and a browser opener. (HTTP transport lives in `http.rs`.) The
// logger contract is served directly by the `log` crate, ambiently, with no
// dedicated trait — matching how the teacher repo treats `log` everywhere.

use crate::atoms::error::PassGfwResult;

/// `Save(key, bytes) -> bool`, `Load(key) -> bytes|null`, `Delete(key) -> bool`,
/// with the strongest at-rest guarantee the OS offers (spec §4.9).
pub trait SecureStorage: Send + Sync {
    fn save(&self, key: &str, bytes: &[u8]) -> bool;
    fn load(&self, key: &str) -> Option<Vec<u8>>;
    fn delete(&self, key: &str) -> bool;
}

/// `Open(url) -> void`, best-effort, non-blocking, side-effect only (spec §4.9).
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str);
}

const KEYRING_SERVICE: &str = "passgfw";
const KEYRING_USER: &str = "store-key";

/// Default `SecureStorage`: an AES-256-GCM key held in the OS keychain (via
/// `keyring`) encrypts a single blob persisted to a file under the platform's
/// data directory. This mirrors the teacher's own dual-layer pattern (a
/// keychain-held symmetric key protecting a larger payload that would not fit
/// a typical keychain value) rather than writing straight to the keychain
/// (spec §4.4: "the best primitive the platform offers").
pub struct KeychainSecureStorage {
    data_dir: std::path::PathBuf,
}

impl KeychainSecureStorage {
    pub fn new() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join("passgfw");
        let _ = std::fs::create_dir_all(&data_dir);
        Self { data_dir }
    }

    fn blob_path(&self, key: &str) -> std::path::PathBuf {
        let safe_key = key.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_");
        self.data_dir.join(format!("{safe_key}.enc"))
    }

    /// Wrapped in `Zeroizing` so the symmetric key is scrubbed from RAM as
    /// soon as it goes out of scope — the same treatment the teacher gives
    /// in-memory provider API keys (`engine/providers/anthropic.rs`).
    fn get_or_create_key(&self) -> PassGfwResult<zeroize::Zeroizing<[u8; 32]>> {
        use rand::Rng;
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
        match entry.get_password() {
            Ok(key_b64) => {
                let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &key_b64)
                    .map_err(|e| crate::atoms::error::PassGfwError::StoreIo(e.to_string()))?;
                let key: [u8; 32] = bytes.try_into().map_err(|_| {
                    crate::atoms::error::PassGfwError::StoreIo("stored key has unexpected length".into())
                })?;
                Ok(zeroize::Zeroizing::new(key))
            }
            Err(keyring::Error::NoEntry) => {
                let mut key = [0u8; 32];
                rand::thread_rng().fill(&mut key[..]);
                let key_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key);
                entry.set_password(&key_b64)?;
                log::info!("[store] generated new store encryption key in the OS keychain");
                Ok(zeroize::Zeroizing::new(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn encrypt(&self, key: &[u8; 32], plain: &[u8]) -> PassGfwResult<Vec<u8>> {
        use aes_gcm::aead::Aead;
        use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
        use rand::Rng;

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| crate::atoms::error::PassGfwError::Other("AES key must be 32 bytes".into()))?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plain)
            .map_err(|e| crate::atoms::error::PassGfwError::Other(format!("AES-GCM encrypt failed: {e}")))?;
        let mut packed = Vec::with_capacity(12 + ciphertext.len());
        packed.extend_from_slice(&nonce_bytes);
        packed.extend_from_slice(&ciphertext);
        Ok(packed)
    }

    fn decrypt(&self, key: &[u8; 32], packed: &[u8]) -> PassGfwResult<Vec<u8>> {
        use aes_gcm::aead::Aead;
        use aes_gcm::{Aes256Gcm, KeyInit, Nonce};

        if packed.len() < 12 + 16 {
            return Err(crate::atoms::error::PassGfwError::Other("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = packed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| crate::atoms::error::PassGfwError::Other("invalid key length".into()))?;
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| crate::atoms::error::PassGfwError::Other("decryption failed — wrong key or corrupted data".into()))
    }
}

impl Default for KeychainSecureStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureStorage for KeychainSecureStorage {
    fn save(&self, key: &str, bytes: &[u8]) -> bool {
        let Ok(enc_key) = self.get_or_create_key() else {
            return false;
        };
        let Ok(packed) = self.encrypt(&enc_key, bytes) else {
            return false;
        };
        let tmp_path = self.blob_path(key).with_extension("enc.tmp");
        let final_path = self.blob_path(key);
        // Write-then-rename gives atomic replace semantics (spec §3.2 invariant 2:
        // partial writes must never be observable to readers).
        if std::fs::write(&tmp_path, &packed).is_err() {
            return false;
        }
        std::fs::rename(&tmp_path, &final_path).is_ok()
    }

    fn load(&self, key: &str) -> Option<Vec<u8>> {
        let packed = std::fs::read(self.blob_path(key)).ok()?;
        let enc_key = self.get_or_create_key().ok()?;
        self.decrypt(&enc_key, &packed).ok()
    }

    fn delete(&self, key: &str) -> bool {
        match std::fs::remove_file(self.blob_path(key)) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }
}

/// Default `BrowserOpener`. `tauri-plugin-opener` (what the teacher's GUI shell
/// uses) requires a live Tauri `AppHandle`, which this standalone library does
/// not have — browser launching is a platform-shell concern the spec scopes
/// out (spec §1). `open` wraps the same "ask the OS to open this URI"
/// primitive (`xdg-open`/`open`/`ShellExecute`) that `tauri-plugin-opener`
/// calls internally, so a non-Tauri consumer (CLI, daemon, test harness) gets
/// a working default; a Tauri host can still supply its own `BrowserOpener`
/// that forwards to `tauri-plugin-opener`.
pub struct SystemBrowserOpener;

impl BrowserOpener for SystemBrowserOpener {
    fn open(&self, url: &str) {
        if let Err(e) = open::that(url) {
            log::warn!("[browser] failed to open '{url}': {e}");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemorySecureStorage {
        inner: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl SecureStorage for InMemorySecureStorage {
        fn save(&self, key: &str, bytes: &[u8]) -> bool {
            self.inner.lock().unwrap().insert(key.to_string(), bytes.to_vec());
            true
        }
        fn load(&self, key: &str) -> Option<Vec<u8>> {
            self.inner.lock().unwrap().get(key).cloned()
        }
        fn delete(&self, key: &str) -> bool {
            self.inner.lock().unwrap().remove(key);
            true
        }
    }

    #[derive(Default)]
    pub struct RecordingBrowserOpener {
        pub opened: Mutex<Vec<String>>,
    }

    impl BrowserOpener for RecordingBrowserOpener {
        fn open(&self, url: &str) {
            self.opened.lock().unwrap().push(url.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::InMemorySecureStorage;
    use super::*;

    #[test]
    fn in_memory_storage_round_trips() {
        let store = InMemorySecureStorage::default();
        assert!(store.save("k", b"hello"));
        assert_eq!(store.load("k"), Some(b"hello".to_vec()));
        assert!(store.delete("k"));
        assert_eq!(store.load("k"), None);
    }

    #[test]
    fn blob_path_sanitizes_key() {
        let storage = KeychainSecureStorage::new();
        let path = storage.blob_path("weird/.. key");
        assert!(!path.to_string_lossy().contains(".."));
    }
}
