use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const KEY_SALT: &[u8] = b"tillguard.secure-store.v1";
const KEY_ROUNDS: u32 = 10_000;
const NONCE_LEN: usize = 12;

/// An encrypted key/value file bound to one machine.
///
/// Every value is sealed with AES-256-GCM under a key derived from the machine
/// id, so the file cannot be hand-edited and does not decrypt when copied to
/// another machine. Writes replace the file with a rename, so a reader never
/// sees a half-written store.
pub struct SecureStore {
    path: PathBuf,
    key: [u8; 32],
    lock: Mutex<()>,
}

impl SecureStore {
    pub fn open(path: impl Into<PathBuf>, machine_id: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(machine_id.as_bytes(), KEY_SALT, KEY_ROUNDS, &mut key);
        Self {
            path: path.into(),
            key,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set an encrypted value in the store
    pub fn secure_set(&self, key: &str, value: &str) -> Result<(), String> {
        let encrypted = self.encrypt_value(value)?;
        let _guard = self.lock_or_recover();

        let mut entries = self.read_entries().unwrap_or_else(|e| {
            log::warn!("Secure store unreadable: {}. Rewriting it.", e);
            Map::new()
        });
        entries.insert(key.to_string(), Value::String(encrypted));
        self.write_entries(&entries)
    }

    /// Get and decrypt a value from the store with corruption recovery
    pub fn secure_get(&self, key: &str) -> Result<Option<String>, String> {
        let _guard = self.lock_or_recover();

        let mut entries = match self.read_entries() {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Secure store unreadable: {}. Treating as empty.", e);
                return Ok(None);
            }
        };

        let decrypted = match entries.get(key) {
            None => return Ok(None),
            Some(Value::String(encrypted)) => self.decrypt_value(encrypted),
            Some(_) => Err("expected string value".to_string()),
        };

        match decrypted {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::error!(
                    "Decryption failed for key '{}': {}. Data may be corrupted or copied from another machine.",
                    key,
                    e
                );
                // Drop just this entry, not the whole store
                entries.remove(key);
                if let Err(save_err) = self.write_entries(&entries) {
                    log::error!("Failed to save store after removing corrupted key: {}", save_err);
                }
                Ok(None)
            }
        }
    }

    /// Delete a value from the secure store. Deleting a missing key is a no-op.
    pub fn secure_delete(&self, key: &str) -> Result<(), String> {
        let _guard = self.lock_or_recover();

        let mut entries = self.read_entries().unwrap_or_default();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.write_entries(&entries)
    }

    /// Check if a key exists and can be decrypted
    pub fn secure_has(&self, key: &str) -> bool {
        matches!(self.secure_get(key), Ok(Some(_)))
    }

    fn read_entries(&self) -> Result<Map<String, Value>, String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(format!("Failed to read store: {}", e)),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(entries)) => Ok(entries),
            Ok(_) => Err("store file is not a JSON object".to_string()),
            Err(e) => Err(format!("Failed to parse store: {}", e)),
        }
    }

    fn write_entries(&self, entries: &Map<String, Value>) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create store directory: {}", e))?;
        }

        let body = serde_json::to_vec(entries)
            .map_err(|e| format!("Failed to encode store: {}", e))?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)
            .map_err(|e| format!("Failed to create temp store file: {}", e))?;
        file.write_all(&body)
            .and_then(|_| file.sync_all())
            .map_err(|e| format!("Failed to write store: {}", e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| format!("Failed to save store: {}", e))
    }

    fn encrypt_value(&self, value: &str) -> Result<String, String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| "Failed to create cipher")?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, value.as_bytes())
            .map_err(|_| "Encryption failed")?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(combined))
    }

    fn decrypt_value(&self, encrypted: &str) -> Result<String, String> {
        let combined = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|_| "Failed to decode encrypted value")?;

        if combined.len() < NONCE_LEN {
            return Err("Invalid encrypted value".to_string());
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| "Failed to create cipher")?;
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| "Decryption failed")?;

        String::from_utf8(plaintext).map_err(|_| "Invalid UTF-8 in decrypted value".to_string())
    }

    fn lock_or_recover(&self) -> MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Recovering from poisoned mutex in SecureStore");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir, machine_id: &str) -> SecureStore {
        SecureStore::open(dir.path().join("secure.dat"), machine_id)
    }

    #[test]
    fn test_set_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "machine-a");

        assert_eq!(store.secure_get("license").unwrap(), None);
        store.secure_set("license", "HK-1234").unwrap();
        assert_eq!(store.secure_get("license").unwrap().as_deref(), Some("HK-1234"));
        assert!(store.secure_has("license"));

        store.secure_delete("license").unwrap();
        assert_eq!(store.secure_get("license").unwrap(), None);
        assert!(!store.secure_has("license"));
    }

    #[test]
    fn test_values_are_not_stored_in_plaintext() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "machine-a");
        store.secure_set("license", "HK-PLAINTEXT").unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("HK-PLAINTEXT"));
    }

    #[test]
    fn test_different_encryptions() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "machine-a");

        let encrypted1 = store.encrypt_value("test-value").unwrap();
        let encrypted2 = store.encrypt_value("test-value").unwrap();

        // Different nonces should produce different ciphertexts
        assert_ne!(encrypted1, encrypted2);
        assert_eq!(store.decrypt_value(&encrypted1).unwrap(), "test-value");
        assert_eq!(store.decrypt_value(&encrypted2).unwrap(), "test-value");
    }

    #[test]
    fn test_copied_file_does_not_decrypt_on_other_machine() {
        let dir = TempDir::new().unwrap();
        store_in(&dir, "machine-a").secure_set("license", "secret").unwrap();

        let foreign = store_in(&dir, "machine-b");
        assert_eq!(foreign.secure_get("license").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "machine-a");
        fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.secure_get("license").unwrap(), None);
        // Writing replaces the corrupt file
        store.secure_set("license", "value").unwrap();
        assert_eq!(store.secure_get("license").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn test_delete_missing_key_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, "machine-a");
        store.secure_delete("nothing").unwrap();
        store.secure_delete("nothing").unwrap();
    }
}
