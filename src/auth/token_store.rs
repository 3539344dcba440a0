//! Credential storage
//!
//! Credentials are stored per fingerprint:
//!
//! - [`KeyringSecretStore`] keeps the credential in the OS keyring
//! - [`FileSecretStore`] keeps it in an encrypted file next to an owner-only key file
//! - [`FallbackSecretStore`] tries one store and falls back to another when the first is
//!   unavailable; [`FallbackSecretStore::system`] is keyring first, encrypted file second
//! - [`MemorySecretStore`] backs tests and one-off runs
//!
//! Encrypted file format (XChaCha20-Poly1305, fingerprint as associated data):
//!
//! ```json
//! { "version": 1, "nonce": "<base64, 24 bytes>", "ciphertext": "<base64>" }
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AuthError, AuthResult, Credential};
use crate::Fingerprint;

/// Keyring service name credentials are filed under
pub const KEYRING_SERVICE: &str = "pocket-export";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const ENVELOPE_VERSION: u32 = 1;

/// Durable storage for access credentials
pub trait SecretStore: Send + Sync {
    /// Stored credential for `fingerprint`, if any
    fn get(&self, fingerprint: &Fingerprint) -> AuthResult<Option<Credential>>;

    /// Store or replace a credential
    fn put(&self, credential: &Credential) -> AuthResult<()>;

    /// Remove the credential; returns whether one existed
    fn remove(&self, fingerprint: &Fingerprint) -> AuthResult<bool>;
}

fn storage_error(action: &str, path: &Path, e: impl std::fmt::Display) -> AuthError {
    AuthError::Storage(format!("failed to {action} {}: {e}", path.display()))
}

/// Parse a stored credential, ignoring ones that are unreadable or belong to another key
fn decode_credential(bytes: &[u8], fingerprint: &Fingerprint, origin: &str) -> Option<Credential> {
    match serde_json::from_slice::<Credential>(bytes) {
        Ok(credential) if credential.fingerprint() == fingerprint => Some(credential),
        Ok(_) => {
            warn!(origin, "Stored credential belongs to another key, ignoring");
            None
        }
        Err(e) => {
            warn!(origin, error = %e, "Stored credential is unreadable, ignoring");
            None
        }
    }
}

fn encode_credential(credential: &Credential) -> AuthResult<Vec<u8>> {
    serde_json::to_vec(credential)
        .map_err(|e| AuthError::Storage(format!("failed to serialize credential: {e}")))
}

/// Credentials in the OS keyring, one entry per fingerprint
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringSecretStore {
    /// Store entries under `service`
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, fingerprint: &Fingerprint) -> AuthResult<keyring::Entry> {
        keyring::Entry::new(&self.service, fingerprint.as_str())
            .map_err(|e| AuthError::Storage(format!("system keyring unavailable: {e}")))
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, fingerprint: &Fingerprint) -> AuthResult<Option<Credential>> {
        match self.entry(fingerprint)?.get_password() {
            Ok(json) => Ok(decode_credential(json.as_bytes(), fingerprint, "keyring")),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Storage(format!("failed to read system keyring: {e}"))),
        }
    }

    fn put(&self, credential: &Credential) -> AuthResult<()> {
        let json = String::from_utf8(encode_credential(credential)?)
            .map_err(|e| AuthError::Storage(format!("failed to serialize credential: {e}")))?;
        self.entry(credential.fingerprint())?
            .set_password(&json)
            .map_err(|e| AuthError::Storage(format!("failed to write system keyring: {e}")))?;
        info!(service = %self.service, "Credential saved to system keyring");
        Ok(())
    }

    fn remove(&self, fingerprint: &Fingerprint) -> AuthResult<bool> {
        match self.entry(fingerprint)?.delete_credential() {
            Ok(()) => {
                info!(service = %self.service, "Credential removed from system keyring");
                Ok(true)
            }
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(AuthError::Storage(format!("failed to update system keyring: {e}"))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    nonce: String,
    ciphertext: String,
}

/// Encrypted credential files with a per-fingerprint owner-only key file
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Store credentials under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the encrypted credential for `fingerprint`
    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint.as_str()))
    }

    /// Path of the key file for `fingerprint`
    pub fn key_path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.key", fingerprint.as_str()))
    }

    fn read_key(&self, fingerprint: &Fingerprint) -> AuthResult<Option<[u8; KEY_LEN]>> {
        let path = self.key_path_for(fingerprint);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read", &path, e)),
        };
        match <[u8; KEY_LEN]>::try_from(bytes.as_slice()) {
            Ok(key) => Ok(Some(key)),
            Err(_) => {
                warn!(path = %path.display(), len = bytes.len(), "Key file has the wrong length, ignoring");
                Ok(None)
            }
        }
    }

    fn key_or_create(&self, fingerprint: &Fingerprint) -> AuthResult<[u8; KEY_LEN]> {
        if let Some(key) = self.read_key(fingerprint)? {
            return Ok(key);
        }
        let key: [u8; KEY_LEN] = rand::thread_rng().gen();
        write_private(&self.dir, &self.key_path_for(fingerprint), &key)?;
        debug!(path = %self.key_path_for(fingerprint).display(), "Created credential key");
        Ok(key)
    }
}

fn cipher(key: &[u8; KEY_LEN]) -> AuthResult<XChaCha20Poly1305> {
    XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| AuthError::Storage(format!("invalid credential key: {e}")))
}

fn seal(key: &[u8; KEY_LEN], fingerprint: &Fingerprint, plaintext: &[u8]) -> AuthResult<Envelope> {
    let nonce: [u8; NONCE_LEN] = rand::thread_rng().gen();
    let ciphertext = cipher(key)?
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: fingerprint.as_str().as_bytes(),
            },
        )
        .map_err(|e| AuthError::Storage(format!("failed to encrypt credential: {e}")))?;
    Ok(Envelope {
        version: ENVELOPE_VERSION,
        nonce: STANDARD.encode(nonce),
        ciphertext: STANDARD.encode(ciphertext),
    })
}

fn unseal(key: &[u8; KEY_LEN], fingerprint: &Fingerprint, envelope: &Envelope) -> Result<Vec<u8>, String> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(format!("unsupported version {}", envelope.version));
    }
    let nonce = STANDARD
        .decode(&envelope.nonce)
        .map_err(|e| format!("bad nonce: {e}"))?;
    if nonce.len() != NONCE_LEN {
        return Err(format!("nonce has {} bytes", nonce.len()));
    }
    let ciphertext = STANDARD
        .decode(&envelope.ciphertext)
        .map_err(|e| format!("bad ciphertext: {e}"))?;
    cipher(key)
        .map_err(|e| e.to_string())?
        .decrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: fingerprint.as_str().as_bytes(),
            },
        )
        .map_err(|_| "authentication failed".to_string())
}

/// Atomically write an owner-only file
fn write_private(dir: &Path, path: &Path, bytes: &[u8]) -> AuthResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| storage_error("create", dir, e))?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| storage_error("create temp file in", dir, e))?;
    restrict_permissions(temp.as_file())?;
    temp.write_all(bytes)
        .map_err(|e| storage_error("write", temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| storage_error("sync", temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| storage_error("persist", path, e))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> AuthResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(storage_error("remove", path, e)),
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, fingerprint: &Fingerprint) -> AuthResult<Option<Credential>> {
        let path = self.path_for(fingerprint);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read", &path, e)),
        };

        let Some(key) = self.read_key(fingerprint)? else {
            warn!(path = %path.display(), "Credential key is missing, ignoring stored credential");
            return Ok(None);
        };
        let plaintext = serde_json::from_slice::<Envelope>(&content)
            .map_err(|e| e.to_string())
            .and_then(|envelope| unseal(&key, fingerprint, &envelope));
        match plaintext {
            Ok(plaintext) => Ok(decode_credential(&plaintext, fingerprint, "file")),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Stored credential cannot be decrypted, ignoring");
                Ok(None)
            }
        }
    }

    fn put(&self, credential: &Credential) -> AuthResult<()> {
        let fingerprint = credential.fingerprint();
        let path = self.path_for(fingerprint);
        let key = self.key_or_create(fingerprint)?;
        let envelope = seal(&key, fingerprint, &encode_credential(credential)?)?;
        let json = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| AuthError::Storage(format!("failed to serialize credential: {e}")))?;
        write_private(&self.dir, &path, &json)?;

        info!(path = %path.display(), "Encrypted credential saved");
        Ok(())
    }

    fn remove(&self, fingerprint: &Fingerprint) -> AuthResult<bool> {
        let path = self.path_for(fingerprint);
        let removed = remove_if_exists(&path)?;
        remove_if_exists(&self.key_path_for(fingerprint))?;
        if removed {
            info!(path = %path.display(), "Credential removed");
        }
        Ok(removed)
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &std::fs::File) -> AuthResult<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .map_err(|e| AuthError::Storage(format!("failed to restrict permissions: {e}")))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &std::fs::File) -> AuthResult<()> {
    Ok(())
}

/// A primary store with a fallback used whenever the primary fails
#[derive(Debug, Clone)]
pub struct FallbackSecretStore<P, F> {
    primary: P,
    fallback: F,
}

impl FallbackSecretStore<KeyringSecretStore, FileSecretStore> {
    /// OS keyring first, encrypted files under `dir` when the keyring is unavailable
    pub fn system(dir: impl Into<PathBuf>) -> Self {
        Self::new(KeyringSecretStore::default(), FileSecretStore::new(dir))
    }
}

impl<P: SecretStore, F: SecretStore> FallbackSecretStore<P, F> {
    /// Combine two stores
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: SecretStore, F: SecretStore> SecretStore for FallbackSecretStore<P, F> {
    fn get(&self, fingerprint: &Fingerprint) -> AuthResult<Option<Credential>> {
        match self.primary.get(fingerprint) {
            Ok(Some(credential)) => Ok(Some(credential)),
            Ok(None) => self.fallback.get(fingerprint),
            Err(e) => {
                debug!(error = %e, "Primary credential store unavailable, reading fallback");
                self.fallback.get(fingerprint)
            }
        }
    }

    fn put(&self, credential: &Credential) -> AuthResult<()> {
        match self.primary.put(credential) {
            Ok(()) => {
                // Drop any older copy so the two stores never disagree
                if let Err(e) = self.fallback.remove(credential.fingerprint()) {
                    debug!(error = %e, "Failed to remove fallback credential copy");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Primary credential store unavailable, using encrypted file");
                self.fallback.put(credential)
            }
        }
    }

    fn remove(&self, fingerprint: &Fingerprint) -> AuthResult<bool> {
        let from_primary = self.primary.remove(fingerprint).unwrap_or_else(|e| {
            debug!(error = %e, "Primary credential store unavailable for removal");
            false
        });
        let from_fallback = self.fallback.remove(fingerprint)?;
        Ok(from_primary || from_fallback)
    }
}

/// In-process credential storage
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    credentials: Mutex<HashMap<Fingerprint, Credential>>,
}

impl MemorySecretStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, Credential>> {
        self.credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, fingerprint: &Fingerprint) -> AuthResult<Option<Credential>> {
        Ok(self.lock().get(fingerprint).cloned())
    }

    fn put(&self, credential: &Credential) -> AuthResult<()> {
        debug!(fingerprint = %credential.fingerprint(), "Credential stored in memory");
        self.lock()
            .insert(credential.fingerprint().clone(), credential.clone());
        Ok(())
    }

    fn remove(&self, fingerprint: &Fingerprint) -> AuthResult<bool> {
        Ok(self.lock().remove(fingerprint).is_some())
    }
}
