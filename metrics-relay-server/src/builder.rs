use std::{
    net::{SocketAddr, TcpListener, ToSocketAddrs},
    sync::Arc,
};

use metrics_relay::{codec::Signer, Store};
use thiserror::Error;

use crate::{routes::State, server::Server};

const DEFAULT_LISTEN_ADDRESS: &str = "localhost:8080";
const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Errors that could occur while building a server.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The listen address could not be resolved.
    #[error("invalid listen address: {reason}")]
    InvalidListenAddress {
        /// Details about the resolution failure.
        reason: String,
    },

    /// Binding the listener failed.
    #[error("failed to create HTTP listener: {0}")]
    FailedToCreateListener(String),

    /// The signing key was rejected.
    #[error("invalid signing key")]
    InvalidKey,

    /// A setting is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Which setting, and why.
        reason: String,
    },
}

/// Builder for a [`Server`].
pub struct ServerBuilder {
    listen_address: String,
    key: Option<Vec<u8>>,
    max_body_size: usize,
}

impl ServerBuilder {
    /// Creates a new `ServerBuilder` with the default configuration.
    pub fn new() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            key: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Sets the address to listen on, as `<host>:<port>`.
    ///
    /// A bare `:<port>` listens on all interfaces. Port 0 picks an ephemeral port; see
    /// [`Server::local_addr`].
    ///
    /// Defaults to `localhost:8080`.
    #[must_use]
    pub fn with_listen_address<A>(mut self, addr: A) -> Self
    where
        A: Into<String>,
    {
        self.listen_address = addr.into();
        self
    }

    /// Sets the key used to verify signed payloads.
    ///
    /// Requests carrying a `HashSHA256` header are rejected when the signature does not match.
    /// An empty key disables verification. Defaults to no key.
    #[must_use]
    pub fn with_signing_key<K>(mut self, key: K) -> Self
    where
        K: Into<Vec<u8>>,
    {
        let key = key.into();
        self.key = if key.is_empty() { None } else { Some(key) };
        self
    }

    /// Sets the maximum request body size, applied both before and after decompression.
    ///
    /// Defaults to 1 MiB.
    #[must_use]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Binds the listener and builds a server backed by `store`.
    ///
    /// # Errors
    ///
    /// If the address cannot be resolved or bound, or the configuration is invalid, an error is
    /// returned.
    pub fn build(self, store: Arc<dyn Store>) -> Result<Server, BuildError> {
        if self.max_body_size == 0 {
            return Err(BuildError::InvalidConfiguration {
                reason: "max body size must be greater than zero".to_string(),
            });
        }

        let signer = match &self.key {
            Some(key) => Some(Signer::new(key).map_err(|_| BuildError::InvalidKey)?),
            None => None,
        };

        let address = resolve(&self.listen_address)?;
        let listener = TcpListener::bind(address)
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                Ok(listener)
            })
            .map_err(|e| BuildError::FailedToCreateListener(e.to_string()))?;
        let local_addr =
            listener.local_addr().map_err(|e| BuildError::FailedToCreateListener(e.to_string()))?;

        let state = State { store, signer, max_body_size: self.max_body_size };
        Ok(Server::new(listener, local_addr, Arc::new(state)))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(address: &str) -> Result<SocketAddr, BuildError> {
    let address = address.trim();
    let qualified;
    let address = if address.starts_with(':') {
        qualified = format!("0.0.0.0{address}");
        qualified.as_str()
    } else {
        address
    };

    address
        .to_socket_addrs()
        .map_err(|e| BuildError::InvalidListenAddress { reason: e.to_string() })?
        .next()
        .ok_or_else(|| BuildError::InvalidListenAddress {
            reason: format!("'{address}' did not resolve to any address"),
        })
}
