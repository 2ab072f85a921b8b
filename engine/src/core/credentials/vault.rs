//! Encrypted File Backend
//!
//! Credential records encrypted at rest with XChaCha20-Poly1305. The
//! encryption key is derived from a caller-supplied passphrase with
//! Argon2id and a random per-vault salt stored next to the entries.
//!
//! Writes go to a unique temp file which is renamed over the vault while
//! an OS-level lock is held, so a crash never leaves a torn vault.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::CredentialBackend;
use crate::core::{now_timestamp, CoreError, CoreResult, Timestamp};

/// Plaintext sealed into every vault to detect a wrong passphrase on open
const VERIFIER_PLAINTEXT: &[u8] = b"contentforge-credential-vault-v1";

/// Errors raised by the vault backend
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Failed to initialize vault: {0}")]
    InitializationFailed(String),

    #[error("Invalid vault passphrase")]
    InvalidPassphrase,

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Vault lock poisoned")]
    LockPoisoned,
}

impl From<VaultError> for CoreError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::IoError(e) => CoreError::IoError(e),
            VaultError::DecryptionError(msg) => CoreError::Decode(msg),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

/// Encrypted record stored in the vault
#[derive(Clone, Serialize, Deserialize)]
struct EncryptedEntry {
    ciphertext: Vec<u8>,
    nonce: [u8; 24],
    stored_at: Timestamp,
}

/// Vault file format
#[derive(Serialize, Deserialize)]
struct VaultFile {
    version: u32,
    salt: Vec<u8>,
    verifier: EncryptedEntry,
    entries: HashMap<String, EncryptedEntry>,
}

/// File-backed, encrypted credential backend
pub struct VaultBackend {
    vault_path: PathBuf,
    salt: Vec<u8>,
    encryption_key: [u8; 32],
    verifier: EncryptedEntry,
    cache: RwLock<HashMap<String, EncryptedEntry>>,
    /// Serializes writes within this process; the fs2 lock covers other processes.
    io_lock: Mutex<()>,
}

impl VaultBackend {
    /// Current vault file version
    const VERSION: u32 = 1;

    /// Opens the vault at `vault_path`, creating it if it does not exist
    pub fn open(vault_path: PathBuf, passphrase: &str) -> Result<Self, VaultError> {
        if passphrase.is_empty() {
            return Err(VaultError::InitializationFailed(
                "Vault passphrase cannot be empty".to_string(),
            ));
        }

        let parent = vault_path
            .parent()
            .ok_or_else(|| VaultError::InitializationFailed("Invalid vault path".to_string()))?;
        std::fs::create_dir_all(parent)?;

        let backend = if vault_path.exists() {
            let file = Self::load_file(&vault_path)?;
            let encryption_key = Self::derive_key(passphrase, &file.salt)?;

            let check = Self::decrypt(
                &encryption_key,
                &file.verifier.nonce,
                &file.verifier.ciphertext,
            )
            .map_err(|_| VaultError::InvalidPassphrase)?;
            if check != VERIFIER_PLAINTEXT {
                return Err(VaultError::InvalidPassphrase);
            }

            debug!("Loaded vault with {} credentials", file.entries.len());

            Self {
                vault_path,
                salt: file.salt,
                encryption_key,
                verifier: file.verifier,
                cache: RwLock::new(file.entries),
                io_lock: Mutex::new(()),
            }
        } else {
            let mut salt = vec![0u8; 16];
            OsRng.fill_bytes(&mut salt);
            let encryption_key = Self::derive_key(passphrase, &salt)?;
            let verifier = Self::seal(&encryption_key, VERIFIER_PLAINTEXT)?;

            let backend = Self {
                vault_path,
                salt,
                encryption_key,
                verifier,
                cache: RwLock::new(HashMap::new()),
                io_lock: Mutex::new(()),
            };
            backend.save_file()?;
            backend
        };

        info!("Credential vault opened at {}", backend.vault_path.display());
        Ok(backend)
    }

    /// Path of the vault file
    pub fn path(&self) -> &Path {
        &self.vault_path
    }

    /// Derives the encryption key using Argon2id
    fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], VaultError> {
        use argon2::{Algorithm, Argon2, Params, Version};

        let params = Params::new(
            8 * 1024, // 8 MB memory cost
            3,        // iterations
            1,        // parallelism
            Some(32),
        )
        .map_err(|e| {
            VaultError::InitializationFailed(format!("Failed to configure key derivation: {}", e))
        })?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| VaultError::InitializationFailed(format!("Key derivation failed: {}", e)))?;

        Ok(key)
    }

    fn load_file(path: &Path) -> Result<VaultFile, VaultError> {
        let content = std::fs::read_to_string(path)?;
        let file: VaultFile = serde_json::from_str(&content)
            .map_err(|e| VaultError::SerializationError(e.to_string()))?;

        if file.version > Self::VERSION {
            return Err(VaultError::InitializationFailed(format!(
                "Vault version {} is newer than supported version {}",
                file.version,
                Self::VERSION
            )));
        }

        Ok(file)
    }

    fn save_file(&self) -> Result<(), VaultError> {
        use fs2::FileExt;

        let _io_guard = self.io_lock.lock().map_err(|_| VaultError::LockPoisoned)?;

        let lock_path = self.vault_path.with_extension("vault.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        lock_file.lock_exclusive()?;

        let entries = self
            .cache
            .read()
            .map_err(|_| VaultError::LockPoisoned)?
            .clone();
        let count = entries.len();

        let file = VaultFile {
            version: Self::VERSION,
            salt: self.salt.clone(),
            verifier: self.verifier.clone(),
            entries,
        };

        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| VaultError::SerializationError(e.to_string()))?;

        let temp_path = self
            .vault_path
            .with_extension(format!("vault.tmp.{}", uuid::Uuid::new_v4()));
        std::fs::write(&temp_path, &content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600));
        }

        #[cfg(windows)]
        {
            if self.vault_path.exists() {
                std::fs::remove_file(&self.vault_path)?;
            }
        }

        std::fs::rename(&temp_path, &self.vault_path)?;
        let _ = FileExt::unlock(&lock_file);

        debug!("Vault saved with {} credentials", count);
        Ok(())
    }

    fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<EncryptedEntry, VaultError> {
        let mut nonce = [0u8; 24];
        OsRng.fill_bytes(&mut nonce);

        Ok(EncryptedEntry {
            ciphertext: Self::encrypt(key, &nonce, plaintext)?,
            nonce,
            stored_at: now_timestamp(),
        })
    }

    fn encrypt(key: &[u8; 32], nonce: &[u8; 24], plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| VaultError::EncryptionError(format!("Invalid key: {}", e)))?;

        cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|e| VaultError::EncryptionError(format!("Encryption failed: {}", e)))
    }

    fn decrypt(key: &[u8; 32], nonce: &[u8; 24], ciphertext: &[u8]) -> Result<Vec<u8>, VaultError> {
        // 16-byte Poly1305 tag
        if ciphertext.len() < 16 {
            return Err(VaultError::DecryptionError(
                "Ciphertext too short (missing authentication tag)".to_string(),
            ));
        }

        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| VaultError::DecryptionError(format!("Invalid key: {}", e)))?;

        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                VaultError::DecryptionError(
                    "Decryption failed: authentication tag verification failed".to_string(),
                )
            })
    }
}

impl CredentialBackend for VaultBackend {
    fn read(&self, key: &str) -> CoreResult<Option<String>> {
        let entry = {
            let cache = self.cache.read().map_err(|_| VaultError::LockPoisoned)?;
            match cache.get(key) {
                Some(entry) => entry.clone(),
                None => return Ok(None),
            }
        };

        let plaintext = Self::decrypt(&self.encryption_key, &entry.nonce, &entry.ciphertext)?;
        let value =
            String::from_utf8(plaintext).map_err(|e| CoreError::Decode(e.to_string()))?;
        Ok(Some(value))
    }

    fn write(&self, key: &str, value: String) -> CoreResult<()> {
        let entry = Self::seal(&self.encryption_key, value.as_bytes())?;
        {
            let mut cache = self.cache.write().map_err(|_| VaultError::LockPoisoned)?;
            cache.insert(key.to_string(), entry);
        }
        self.save_file()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        let removed = {
            let mut cache = self.cache.write().map_err(|_| VaultError::LockPoisoned)?;
            cache.remove(key).is_some()
        };
        if removed {
            self.save_file()?;
        }
        Ok(())
    }

    fn keys(&self) -> CoreResult<Vec<String>> {
        let cache = self.cache.read().map_err(|_| VaultError::LockPoisoned)?;
        Ok(cache.keys().cloned().collect())
    }
}

impl std::fmt::Debug for VaultBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultBackend")
            .field("vault_path", &self.vault_path)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
