use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use kvbox_core::{BoxEngine, BoxHandle, EncryptionKey, EngineError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

const NONCE_LEN: usize = 12;

/// File-backed box engine: one JSON envelope per box under `root`.
/// Boxes opened with a key are sealed with AES-256-GCM, using a fresh nonce per write.
pub struct FileBoxEngine {
    root: PathBuf,
}

impl FileBoxEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.box", URL_SAFE_NO_PAD.encode(name)))
    }
}

/// On-disk envelope. `nonce` is present only for encrypted boxes.
#[derive(Debug, Serialize, Deserialize)]
struct StoredBox {
    nonce: Option<String>,
    payload: String,
}

#[async_trait]
impl BoxEngine for FileBoxEngine {
    #[instrument(skip_all, fields(name = %name))]
    async fn open(
        &self,
        name: &str,
        key: Option<&EncryptionKey>,
    ) -> Result<Box<dyn BoxHandle>, EngineError> {
        fs::create_dir_all(&self.root).map_err(storage_err)?;

        let path = self.path_for(name);
        let cipher = key.map(build_cipher).transpose()?;
        let entries = match read_envelope(name, &path)? {
            Some(envelope) => unseal(name, &envelope, cipher.as_ref())?,
            None => BTreeMap::new(),
        };
        debug!(entries = entries.len(), encrypted = cipher.is_some(), "box opened");

        Ok(Box::new(FileBoxHandle {
            name: name.to_string(),
            path,
            cipher,
            state: Mutex::new(FileBoxState {
                entries,
                deleted: false,
            }),
        }))
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn delete_from_disk(&self, name: &str) -> Result<(), EngineError> {
        remove_file(&self.path_for(name))
    }
}

struct FileBoxHandle {
    name: String,
    path: PathBuf,
    cipher: Option<Aes256Gcm>,
    state: Mutex<FileBoxState>,
}

struct FileBoxState {
    entries: BTreeMap<String, Value>,
    deleted: bool,
}

impl FileBoxHandle {
    fn state(&self) -> Result<MutexGuard<'_, FileBoxState>, EngineError> {
        let state = self.state.lock().map_err(|err| EngineError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        if state.deleted {
            return Err(EngineError::Deleted {
                name: self.name.clone(),
            });
        }
        Ok(state)
    }

    /// Apply `change` to a copy of the entries, persist it, then swap it in.
    /// A failed write leaves both the file and the in-memory view untouched.
    fn mutate(&self, change: impl FnOnce(&mut BTreeMap<String, Value>)) -> Result<(), EngineError> {
        let mut state = self.state()?;
        let mut next = state.entries.clone();
        change(&mut next);
        write_envelope(&self.path, &seal(&next, self.cipher.as_ref())?)?;
        state.entries = next;
        Ok(())
    }
}

impl BoxHandle for FileBoxHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Value>, EngineError> {
        Ok(self.state()?.entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), EngineError> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn delete(&self, key: &str) -> Result<(), EngineError> {
        if !self.contains_key(key)? {
            return Ok(());
        }
        self.mutate(|entries| {
            entries.remove(key);
        })
    }

    fn clear(&self) -> Result<(), EngineError> {
        self.mutate(|entries| entries.clear())
    }

    fn contains_key(&self, key: &str) -> Result<bool, EngineError> {
        Ok(self.state()?.entries.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.state()?.entries.keys().cloned().collect())
    }

    fn delete_from_disk(&self) -> Result<(), EngineError> {
        let mut state = self.state()?;
        remove_file(&self.path)?;
        state.entries.clear();
        state.deleted = true;
        Ok(())
    }
}

fn seal(
    entries: &BTreeMap<String, Value>,
    cipher: Option<&Aes256Gcm>,
) -> Result<StoredBox, EngineError> {
    let plaintext = serde_json::to_string(entries).map_err(storage_err)?;
    let Some(cipher) = cipher else {
        return Ok(StoredBox {
            nonce: None,
            payload: plaintext,
        });
    };

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| EngineError::Storage {
            reason: format!("encrypt failed: {e}"),
        })?;

    Ok(StoredBox {
        nonce: Some(URL_SAFE_NO_PAD.encode(nonce.as_slice())),
        payload: URL_SAFE_NO_PAD.encode(ciphertext),
    })
}

fn unseal(
    name: &str,
    envelope: &StoredBox,
    cipher: Option<&Aes256Gcm>,
) -> Result<BTreeMap<String, Value>, EngineError> {
    let plaintext = match (cipher, &envelope.nonce) {
        (None, None) => envelope.payload.as_bytes().to_vec(),
        (Some(cipher), Some(nonce)) => {
            let nonce_bytes = URL_SAFE_NO_PAD
                .decode(nonce)
                .map_err(|e| corrupted(name, format!("nonce decode failed: {e}")))?;
            if nonce_bytes.len() != NONCE_LEN {
                return Err(corrupted(
                    name,
                    format!("nonce has {} bytes", nonce_bytes.len()),
                ));
            }
            let ciphertext = URL_SAFE_NO_PAD
                .decode(&envelope.payload)
                .map_err(|e| corrupted(name, format!("ciphertext decode failed: {e}")))?;

            // AES-GCM cannot tell a wrong key from tampered bytes.
            cipher
                .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
                .map_err(|_| EngineError::KeyMismatch {
                    name: name.to_string(),
                })?
        }
        _ => {
            return Err(EngineError::KeyMismatch {
                name: name.to_string(),
            })
        }
    };

    serde_json::from_slice(&plaintext).map_err(|e| corrupted(name, e.to_string()))
}

fn write_envelope(path: &Path, envelope: &StoredBox) -> Result<(), EngineError> {
    let parent = path.parent().ok_or_else(|| EngineError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(envelope).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_envelope(name: &str, path: &Path) -> Result<Option<StoredBox>, EngineError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf)
        .map(Some)
        .map_err(|e| corrupted(name, e.to_string()))
}

fn remove_file(path: &Path) -> Result<(), EngineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(storage_err(err)),
    }
}

fn build_cipher(key: &EncryptionKey) -> Result<Aes256Gcm, EngineError> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| EngineError::Storage {
        reason: format!("cipher init failed: {e}"),
    })
}

fn corrupted(name: &str, reason: String) -> EngineError {
    EngineError::Corrupted {
        name: name.to_string(),
        reason,
    }
}

fn storage_err<E: ToString>(err: E) -> EngineError {
    EngineError::Storage {
        reason: err.to_string(),
    }
}
