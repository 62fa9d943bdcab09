use super::{KeyPair, PublicKey};
use crate::service::OnionAddress;
use std::fmt;

/// Complete identity of an onion service
///
/// Contains the keypair and the address derived from its public half
#[derive(Clone)]
pub struct Identity {
    keypair: KeyPair,
    address: OnionAddress,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::from_keypair(KeyPair::generate())
    }

    /// Create an identity from an existing keypair
    pub fn from_keypair(keypair: KeyPair) -> Self {
        let address = OnionAddress::from_public_key(&keypair.public_key());
        Self { keypair, address }
    }

    /// Get the keypair
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Address the service is reachable under
    pub fn address(&self) -> &OnionAddress {
        &self.address
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("public_key", &self.public_key())
            .finish()
    }
}
