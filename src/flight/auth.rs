//! Handshake authentication
//!
//! A client opens the Handshake stream and sends the shared secret as the
//! payload of its first message. On a match the server mints a session token
//! and sends it back; every later call must carry that token, either in the
//! binary `auth-token-bin` header or as `authorization: Bearer <token>`.
//!
//! NOTE: this is a placeholder scheme. Tokens never expire and are never
//! revoked, so the valid-token set only grows for the lifetime of the server.
//! Do not expose it to untrusted networks.

use std::collections::HashSet;

use arrow_flight::HandshakeRequest;
use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tonic::metadata::MetadataMap;
use tonic::Status;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Binary header carrying the session token (Go/C++ client convention)
pub const AUTH_HEADER: &str = "auth-token-bin";

/// Standard header carrying `Bearer <token>` (Rust/Java client convention)
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Session token length, in alphanumeric characters
pub const TOKEN_LEN: usize = 32;

/// Shared-secret handshake plus the set of tokens it has issued.
#[derive(Debug)]
pub struct AuthGate {
    secret: String,
    tokens: RwLock<HashSet<String>>,
}

impl AuthGate {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tokens: RwLock::new(HashSet::new()),
        }
    }

    /// Run the server side of the handshake and return the minted token.
    pub async fn authenticate<S>(&self, mut inbound: S) -> Result<String>
    where
        S: Stream<Item = std::result::Result<HandshakeRequest, Status>> + Unpin,
    {
        let request = match inbound.next().await {
            None => return Err(Error::Unauthenticated("no auth info provided".into())),
            Some(Err(status)) => {
                return Err(Error::FailedPrecondition(format!(
                    "error reading auth handshake: {}",
                    status.message()
                )))
            }
            Some(Ok(request)) => request,
        };

        if request.payload.as_ref() != self.secret.as_bytes() {
            warn!("handshake rejected: wrong shared secret");
            return Err(Error::PermissionDenied("invalid auth token".into()));
        }

        let token = generate_token();
        self.tokens.write().insert(token.clone());
        info!("client authenticated");
        Ok(token)
    }

    /// Check that `token` was issued by this gate.
    pub fn validate(&self, token: &str) -> Result<()> {
        if self.tokens.read().contains(token) {
            Ok(())
        } else {
            Err(Error::PermissionDenied("invalid auth token".into()))
        }
    }

    /// Pull the session token out of request metadata and validate it.
    pub fn authorize(&self, metadata: &MetadataMap) -> Result<()> {
        if let Some(value) = metadata.get_bin(AUTH_HEADER) {
            let bytes = value
                .to_bytes()
                .map_err(|_| {
                    Error::PermissionDenied(format!("undecodable {AUTH_HEADER} header"))
                })?;
            let token = std::str::from_utf8(&bytes)
                .map_err(|_| Error::PermissionDenied(format!("{AUTH_HEADER} is not UTF-8")))?;
            return self.validate(token);
        }

        if let Some(value) = metadata.get(AUTHORIZATION_HEADER) {
            let header = value
                .to_str()
                .map_err(|_| {
                    Error::PermissionDenied("authorization header is not ASCII".into())
                })?;
            let token = header
                .strip_prefix("Bearer ")
                .ok_or_else(|| Error::PermissionDenied("expected a Bearer token".into()))?;
            return self.validate(token.trim());
        }

        debug!("call carries no session token");
        Err(Error::Unauthenticated("no session token presented".into()))
    }

    /// Number of tokens issued so far.
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
