pub mod identity;
pub mod overlay;
pub mod service;

pub use identity::{obtain_identity, Identity, KeyPair, KeyStoreError, PublicKey};
pub use service::{OnionAddress, OnionAddressError};

// Re-export overlay types
pub use overlay::{
    BootstrapError, BootstrapState, Bootstrapper, NetworkError, OverlayLauncher, OverlayNetwork,
    PublishedService, TorLauncher, TorProcess,
};
