//! On-disk persistence of the service key.
//!
//! The key lives in a single PEM file:
//! ```text
//! -----BEGIN ED25519 PRIVATE KEY-----
//! MC4CAQAwBQYDK2VwBCIEI...
//! -----END ED25519 PRIVATE KEY-----
//! ```
//! The body is a PKCS#8 `PrivateKeyInfo`. A key is generated only when no file
//! exists; an existing file that fails to decode is an error, never a reason to
//! generate a new key, because the key *is* the service address.

use super::{Identity, KeyPair};
use ed25519_dalek::pkcs8::{
    DecodePrivateKey, EncodePrivateKey, KeypairBytes, ObjectIdentifier, PrivateKeyInfo,
    ALGORITHM_OID,
};
use ed25519_dalek::SigningKey;
use pem_rfc7468::LineEnding;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label written on new key files
pub const PEM_LABEL: &str = "ED25519 PRIVATE KEY";

/// Label used by generic PKCS#8 tooling (`openssl genpkey`), also accepted
const GENERIC_PEM_LABEL: &str = "PRIVATE KEY";

/// How long to wait for a concurrent creator to finish writing its record
const CONCURRENT_READ_ATTEMPTS: u32 = 10;
const CONCURRENT_READ_DELAY: Duration = Duration::from_millis(50);

/// Load the identity stored at `path`, creating it on first use.
pub fn obtain_identity(path: &Path) -> Result<Identity, KeyStoreError> {
    match fs::read(path) {
        Ok(contents) => {
            let keypair = decode_file(path, &contents)?;
            debug!(path = %path.display(), "loaded service key");
            Ok(Identity::from_keypair(keypair))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => create(path),
        Err(source) => Err(KeyStoreError::Unreadable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Encode a keypair as a PEM wrapped PKCS#8 v1 record
pub fn encode_key_record(keypair: &KeyPair) -> Result<String, KeyStoreError> {
    let document = KeypairBytes {
        secret_key: keypair.secret_bytes(),
        public_key: None,
    }
    .to_pkcs8_der()
    .map_err(|e| KeyStoreError::Encode(e.to_string()))?;

    pem_rfc7468::encode_string(PEM_LABEL, LineEnding::LF, document.as_bytes())
        .map_err(|e| KeyStoreError::Encode(e.to_string()))
}

/// Decode a PEM wrapped PKCS#8 record into an Ed25519 keypair
pub fn decode_key_record(record: &str) -> Result<KeyPair, KeyStoreError> {
    let (label, der) = pem_rfc7468::decode_vec(record.trim().as_bytes())
        .map_err(|e| KeyStoreError::Envelope(e.to_string()))?;

    if label != PEM_LABEL && label != GENERIC_PEM_LABEL {
        return Err(KeyStoreError::UnexpectedLabel(label.to_string()));
    }

    let info = PrivateKeyInfo::try_from(der.as_slice())
        .map_err(|e| KeyStoreError::Malformed(e.to_string()))?;

    if info.algorithm.oid != ALGORITHM_OID {
        return Err(KeyStoreError::WrongKeyType {
            algorithm: algorithm_name(&info.algorithm.oid),
        });
    }

    let signing_key =
        SigningKey::from_pkcs8_der(&der).map_err(|e| KeyStoreError::Malformed(e.to_string()))?;

    Ok(KeyPair::from_signing_key(signing_key))
}

fn decode_file(path: &Path, contents: &[u8]) -> Result<KeyPair, KeyStoreError> {
    let record = std::str::from_utf8(contents).map_err(|_| {
        KeyStoreError::Envelope(format!("{} is not a text file", path.display()))
    })?;
    decode_key_record(record)
}

fn create(path: &Path) -> Result<Identity, KeyStoreError> {
    let keypair = KeyPair::generate();
    let record = encode_key_record(&keypair)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| KeyStoreError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
    }

    match write_new(path, record.as_bytes()) {
        Ok(()) => {
            info!(path = %path.display(), "generated new service key");
            Ok(Identity::from_keypair(keypair))
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            // Another instance won the race; its key is the one to use.
            warn!(path = %path.display(), "key file created concurrently, loading it");
            Ok(Identity::from_keypair(load_concurrent(path)?))
        }
        Err(source) => Err(KeyStoreError::Persist {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Load a key file another process has just created. Its record may still be
/// partially written, so incomplete reads are retried for a short while.
fn load_concurrent(path: &Path) -> Result<KeyPair, KeyStoreError> {
    let mut attempt = 1;
    loop {
        let contents = fs::read(path).map_err(|source| KeyStoreError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        match decode_file(path, &contents) {
            Err(KeyStoreError::Envelope(_) | KeyStoreError::Malformed(_))
                if attempt < CONCURRENT_READ_ATTEMPTS =>
            {
                debug!(attempt, "key file still being written");
                std::thread::sleep(CONCURRENT_READ_DELAY);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Write `bytes` to a file that must not exist yet, owner-only on Unix.
fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    let written = file.write_all(bytes).and_then(|_| file.sync_all());
    if written.is_err() {
        // A truncated record would fail every later start
        let _ = fs::remove_file(path);
    }
    written
}

fn algorithm_name(oid: &ObjectIdentifier) -> String {
    let dotted = oid.to_string();
    let name = match dotted.as_str() {
        "1.2.840.113549.1.1.1" => Some("rsaEncryption"),
        "1.2.840.10045.2.1" => Some("id-ecPublicKey"),
        "1.3.101.110" => Some("X25519"),
        "1.3.101.111" => Some("X448"),
        "1.3.101.113" => Some("Ed448"),
        _ => None,
    };

    match name {
        Some(name) => format!("{} ({})", name, dotted),
        None => dotted,
    }
}

/// Key store errors
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("Cannot read key file {}: {source}", .path.display())]
    Unreadable { path: PathBuf, source: io::Error },

    #[error("Cannot write key file {}: {source}", .path.display())]
    Persist { path: PathBuf, source: io::Error },

    #[error("Undecodable PEM envelope: {0}")]
    Envelope(String),

    #[error("Unexpected PEM label {0:?}, wanted \"ED25519 PRIVATE KEY\"")]
    UnexpectedLabel(String),

    #[error("Malformed PKCS#8 private key: {0}")]
    Malformed(String),

    #[error("Invalid key type {algorithm}, wanted Ed25519")]
    WrongKeyType { algorithm: String },

    #[error("Cannot encode private key: {0}")]
    Encode(String),
}
