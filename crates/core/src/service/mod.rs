/// .onion service addressing
///
/// Addresses are derived from the service's public key, so the key file
/// alone determines where the service can be reached.

pub mod address;

pub use address::{OnionAddress, OnionAddressError};
