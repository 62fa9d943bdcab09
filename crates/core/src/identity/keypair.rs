use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use std::fmt;

/// The Ed25519 keypair a service is published under
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random keypair from the OS CSPRNG
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut rng = OsRng;
        let mut secret_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_bytes);

        Self::from_signing_key(SigningKey::from_bytes(&secret_bytes))
    }

    /// Create a keypair from a 32-byte secret seed
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    pub(crate) fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Get the secret seed bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.verifying_key,
        }
    }

    /// Expanded secret key as Tor expects it in `ADD_ONION ED25519-V3:<blob>`.
    ///
    /// `SHA-512(seed)` with the scalar half clamped; the second half is the nonce
    /// prefix and is left untouched.
    pub fn expanded_secret(&self) -> [u8; 64] {
        let digest = Sha512::digest(self.signing_key.to_bytes());
        let mut expanded = [0u8; 64];
        expanded.copy_from_slice(&digest);
        expanded[0] &= 248;
        expanded[31] &= 127;
        expanded[31] |= 64;
        expanded
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_bytes()))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Public half of a service keypair
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PublicKey {
    /// Get the public key bytes
    pub fn as_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.as_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_bytes() {
        let keypair1 = KeyPair::generate();
        let secret = keypair1.secret_bytes();

        let keypair2 = KeyPair::from_secret_bytes(&secret);
        assert_eq!(keypair1.public_bytes(), keypair2.public_bytes());
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.secret_bytes(), b.secret_bytes());
    }

    #[test]
    fn test_expanded_secret_is_clamped() {
        let keypair = KeyPair::generate();
        let expanded = keypair.expanded_secret();

        assert_eq!(expanded[0] & 7, 0);
        assert_eq!(expanded[31] & 128, 0);
        assert_eq!(expanded[31] & 64, 64);

        // deterministic in the seed
        assert_eq!(expanded, keypair.expanded_secret());
    }

    #[test]
    fn test_expanded_secret_tail_is_digest_tail() {
        let keypair = KeyPair::from_secret_bytes(&[7u8; 32]);
        let digest = Sha512::digest([7u8; 32]);
        assert_eq!(&keypair.expanded_secret()[32..], &digest[32..]);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keypair = KeyPair::generate();
        let rendered = format!("{:?}", keypair);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&hex::encode(keypair.secret_bytes())));
    }
}
