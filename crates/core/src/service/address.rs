/// Onion service addresses (Tor v3)
///
/// An address is the service's public key plus a two byte checksum and a
/// version byte, base32 encoded:
///
/// ```text
/// onion_address = base32(PUBKEY | CHECKSUM | VERSION) + ".onion"
/// CHECKSUM = SHA3-256(".onion checksum" | PUBKEY | VERSION)[:2]
/// ```
///
/// Anyone holding the address can check that a descriptor was signed by the
/// matching key, so the address cannot be impersonated.

use crate::identity::PublicKey;
use onionserve_common::service::TLD;
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Address scheme version byte
pub const VERSION: u8 = 0x03;

/// Length of the base32 service id (without the TLD)
pub const SERVICE_ID_LEN: usize = 56;

const CHECKSUM_PREFIX: &[u8] = b".onion checksum";

/// A v3 onion address (e.g., "<56 base32 characters>.onion")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OnionAddress([u8; 32]);

impl OnionAddress {
    /// Derive the address of the service published under `public_key`
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(public_key.as_bytes())
    }

    /// Raw public key bytes embedded in the address
    pub fn public_key_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The 56 character lowercase id, as Tor reports it in `ServiceID=`
    pub fn service_id(&self) -> String {
        let mut raw = [0u8; 35];
        raw[..32].copy_from_slice(&self.0);
        raw[32..34].copy_from_slice(&checksum(&self.0, VERSION));
        raw[34] = VERSION;

        data_encoding::BASE32_NOPAD.encode(&raw).to_lowercase()
    }

    /// Convert to .onion hostname
    pub fn hostname(&self) -> String {
        format!("{}.{}", self.service_id(), TLD)
    }

    /// URL operators hand out to reach the service over HTTP
    pub fn url(&self) -> String {
        format!("http://{}", self.hostname())
    }

    /// Parse from hostname (with or without .onion suffix)
    pub fn from_hostname(hostname: &str) -> Result<Self, OnionAddressError> {
        let hostname = hostname.trim().to_lowercase();

        let id = hostname
            .strip_suffix(".onion")
            .unwrap_or(hostname.as_str());

        if id.len() != SERVICE_ID_LEN {
            return Err(OnionAddressError::InvalidLength(id.len()));
        }

        let raw = data_encoding::BASE32_NOPAD
            .decode(id.to_uppercase().as_bytes())
            .map_err(|_| OnionAddressError::InvalidEncoding)?;

        let mut key = [0u8; 32];
        key.copy_from_slice(&raw[..32]);

        let version = raw[34];
        if version != VERSION {
            return Err(OnionAddressError::UnsupportedVersion(version));
        }

        if raw[32..34] != checksum(&key, version) {
            return Err(OnionAddressError::ChecksumMismatch);
        }

        Ok(Self(key))
    }

    /// Check if a hostname is a .onion address
    pub fn is_onion_address(hostname: &str) -> bool {
        hostname.trim().to_lowercase().ends_with(".onion")
    }

    /// Verify that this address matches the given public key
    pub fn verify_public_key(&self, public_key: &PublicKey) -> bool {
        self == &Self::from_public_key(public_key)
    }
}

fn checksum(key: &[u8; 32], version: u8) -> [u8; 2] {
    let mut hasher = Sha3_256::new();
    hasher.update(CHECKSUM_PREFIX);
    hasher.update(key);
    hasher.update([version]);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hostname())
    }
}

/// Onion address errors
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum OnionAddressError {
    #[error("Invalid base32 encoding")]
    InvalidEncoding,

    #[error("Invalid address length: {0} (expected 56)")]
    InvalidLength(usize),

    #[error("Unsupported address version {0}")]
    UnsupportedVersion(u8),

    #[error("Address checksum does not match")]
    ChecksumMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KeyPair;

    #[test]
    fn test_address_shape() {
        let keypair = KeyPair::generate();
        let address = OnionAddress::from_public_key(&keypair.public_key());

        let id = address.service_id();
        assert_eq!(id.len(), SERVICE_ID_LEN);
        assert_eq!(id, id.to_lowercase());
        // last base32 digit carries the version byte 0x03
        assert!(id.ends_with('d'));

        assert_eq!(address.hostname(), format!("{}.onion", id));
        assert_eq!(address.url(), format!("http://{}.onion", id));
    }

    #[test]
    fn test_known_address() {
        // RFC 8032 test vector 1
        let seed: [u8; 32] =
            hex::decode("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60")
                .unwrap()
                .try_into()
                .unwrap();
        let keypair = KeyPair::from_secret_bytes(&seed);
        assert_eq!(
            hex::encode(keypair.public_bytes()),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );

        let address = OnionAddress::from_public_key(&keypair.public_key());
        assert_eq!(
            address.service_id(),
            "25njqamcweflpvkl73j4szahhihoc4xt3ktcgjnpaingr5yhkenl5sid"
        );
        assert_eq!(
            OnionAddress::from_hostname("25njqamcweflpvkl73j4szahhihoc4xt3ktcgjnpaingr5yhkenl5sid.onion"),
            Ok(address)
        );
    }

    #[test]
    fn test_address_is_deterministic() {
        let keypair = KeyPair::generate();
        let a = OnionAddress::from_public_key(&keypair.public_key());
        let b = OnionAddress::from_public_key(&keypair.public_key());

        assert_eq!(a.service_id(), b.service_id());

        let reloaded = KeyPair::from_secret_bytes(&keypair.secret_bytes());
        assert_eq!(
            OnionAddress::from_public_key(&reloaded.public_key()).service_id(),
            a.service_id()
        );
    }

    #[test]
    fn test_address_embeds_public_key() {
        let keypair = KeyPair::generate();
        let address = OnionAddress::from_public_key(&keypair.public_key());

        let raw = data_encoding::BASE32_NOPAD
            .decode(address.service_id().to_uppercase().as_bytes())
            .unwrap();
        assert_eq!(raw.len(), 35);
        assert_eq!(&raw[..32], &keypair.public_bytes());
        assert_eq!(&raw[32..34], &checksum(&keypair.public_bytes(), VERSION));
        assert_eq!(raw[34], VERSION);
    }

    #[test]
    fn test_parse_with_and_without_suffix() {
        let keypair = KeyPair::generate();
        let address = OnionAddress::from_public_key(&keypair.public_key());

        let parsed1 = OnionAddress::from_hostname(&address.service_id()).unwrap();
        let parsed2 = OnionAddress::from_hostname(&address.hostname()).unwrap();
        let parsed3 = OnionAddress::from_hostname(&address.hostname().to_uppercase()).unwrap();

        assert_eq!(address, parsed1);
        assert_eq!(address, parsed2);
        assert_eq!(address, parsed3);
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let keypair = KeyPair::generate();
        let address = OnionAddress::from_public_key(&keypair.public_key());

        let mut raw = data_encoding::BASE32_NOPAD
            .decode(address.service_id().to_uppercase().as_bytes())
            .unwrap();
        raw[32] ^= 0xff;
        let forged = data_encoding::BASE32_NOPAD.encode(&raw).to_lowercase();

        assert_eq!(
            OnionAddress::from_hostname(&forged),
            Err(OnionAddressError::ChecksumMismatch)
        );
    }

    #[test]
    fn test_parse_rejects_other_versions() {
        let key = KeyPair::generate().public_bytes();
        let mut raw = Vec::with_capacity(35);
        raw.extend_from_slice(&key);
        raw.extend_from_slice(&checksum(&key, 0x02));
        raw.push(0x02);
        let id = data_encoding::BASE32_NOPAD.encode(&raw).to_lowercase();

        assert_eq!(
            OnionAddress::from_hostname(&id),
            Err(OnionAddressError::UnsupportedVersion(0x02))
        );
    }

    #[test]
    fn test_parse_rejects_v2_length() {
        assert_eq!(
            OnionAddress::from_hostname("expyuzz4wqqyqhjn.onion"),
            Err(OnionAddressError::InvalidLength(16))
        );
    }

    #[test]
    fn test_parse_rejects_bad_alphabet() {
        let id = "1".repeat(SERVICE_ID_LEN);
        assert_eq!(
            OnionAddress::from_hostname(&id),
            Err(OnionAddressError::InvalidEncoding)
        );
    }

    #[test]
    fn test_address_verification() {
        let keypair = KeyPair::generate();
        let address = OnionAddress::from_public_key(&keypair.public_key());

        assert!(address.verify_public_key(&keypair.public_key()));

        let other_keypair = KeyPair::generate();
        assert!(!address.verify_public_key(&other_keypair.public_key()));
    }

    #[test]
    fn test_is_onion_address() {
        assert!(OnionAddress::is_onion_address("test.onion"));
        assert!(OnionAddress::is_onion_address("TEST.ONION"));

        assert!(!OnionAddress::is_onion_address("example.com"));
        assert!(!OnionAddress::is_onion_address("test.anon"));
    }
}
