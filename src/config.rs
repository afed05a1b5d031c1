//! Server configuration
//!
//! Everything is read once at process start. Host, port and the shared
//! handshake secret come from the environment, the rest are fixed defaults.

use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::{Error, Result, MIB};

/// Default bind host
pub const DEFAULT_HOST: &str = "localhost";

/// Default bind port
pub const DEFAULT_PORT: u16 = 9090;

/// Default shared handshake secret
pub const DEFAULT_AUTH_TOKEN: &str = "foobar";

/// Time a ticket issued by GetFlightInfo stays redeemable
pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(5 * 60);

/// How often expired tickets are swept out of the cache
pub const TICKET_SWEEP_PERIOD: Duration = Duration::from_secs(30);

/// Largest inbound gRPC message accepted (tonic defaults to 4 MiB)
pub const MAX_MESSAGE_SIZE: usize = 20 * MIB;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret a client must present during the handshake
    pub auth_token: String,
    pub ticket_ttl: Duration,
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            auth_token: DEFAULT_AUTH_TOKEN.to_string(),
            ticket_ttl: DEFAULT_TICKET_TTL,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Read `FLIGHT_HOST`/`HOST`, `FLIGHT_PORT`/`PORT` and `FLIGHT_AUTH_TOKEN`.
    pub fn from_env() -> Self {
        let host = env::var("FLIGHT_HOST")
            .or_else(|_| env::var("HOST"))
            .unwrap_or_else(|_| DEFAULT_HOST.to_string());

        let port = env::var("FLIGHT_PORT")
            .or_else(|_| env::var("PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let auth_token =
            env::var("FLIGHT_AUTH_TOKEN").unwrap_or_else(|_| DEFAULT_AUTH_TOKEN.to_string());

        Self {
            host,
            port,
            auth_token,
            ..Self::default()
        }
    }

    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = auth_token.into();
        self
    }

    pub fn with_ticket_ttl(mut self, ttl: Duration) -> Self {
        self.ticket_ttl = ttl;
        self
    }

    /// Resolve `host:port` to the first socket address it names.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let target = format!("{}:{}", self.host, self.port);
        target
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("cannot resolve {target}: {e}")))?
            .next()
            .ok_or_else(|| Error::Config(format!("{target} resolves to no address")))
    }
}
