/// onionserve daemon library
///
/// Serves a website either locally or as a Tor onion service, and owns the
/// process lifecycle around it.

pub mod cli;
pub mod lifecycle;
pub mod server;
pub mod site;

pub use lifecycle::{shutdown_signal, Lifecycle};
pub use server::{LocalServer, OnionServer, Server};
