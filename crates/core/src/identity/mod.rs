mod identity;
mod keypair;
pub mod keystore;

pub use identity::Identity;
pub use keypair::{KeyPair, PublicKey};
pub use keystore::{decode_key_record, encode_key_record, obtain_identity, KeyStoreError};
