//! Transport: plain TCP, Unix socket, or TLS.
mod socket;
mod tls;

pub use socket::Socket;
pub(crate) use tls::default_client_config;
