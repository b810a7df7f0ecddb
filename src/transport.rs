//! BMC transport: the authenticated remote-shell channel.
//!
//! The session layer only ever sees the two capability traits here —
//! [`BmcTransport`] dials a connection, [`TransportSession`] runs one text
//! command and returns its text output. The production implementation is
//! [`SshTransport`] over russh; tests inject a scripted fake instead.
//!
//! Lights-out controllers of this generation only negotiate legacy key
//! exchange, so the client config pins `diffie-hellman-group14-sha1` ahead
//! of modern kex and keeps `ssh-rsa` in the host-key list. Host keys are
//! accepted without verification — the controller sits on a management
//! network and regenerates its key on firmware resets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, AuthResult, Handle};
use russh::keys::ssh_key::{Algorithm, HashAlg};
use russh::{ChannelMsg, Disconnect, Preferred};
use thiserror::Error;
use tracing::debug;

use crate::config::BmcConfig;

/// TCP + SSH handshake budget for one connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

const LEGACY_KEX: &[russh::kex::Name] = &[
    russh::kex::DH_G14_SHA1,
    russh::kex::DH_G14_SHA256,
    russh::kex::CURVE25519,
    russh::kex::EXTENSION_SUPPORT_AS_CLIENT,
];

const HOST_KEY_ALGS: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {0} failed: {1}")]
    Connect(String, String),
    #[error("authentication rejected for user {0}")]
    Auth(String),
    #[error("command timed out after {0} ms")]
    Timeout(u64),
    #[error(transparent)]
    Ssh(#[from] russh::Error),
    #[cfg(test)]
    #[error("scripted failure")]
    Scripted,
}

/// Capability to dial the BMC. One call yields one interactive session.
#[async_trait]
pub trait BmcTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// A live session: executes a single text command, returns its text output.
#[async_trait]
pub trait TransportSession: Send {
    async fn exec(&mut self, command: &str) -> Result<String, TransportError>;
    async fn close(&mut self);
}

/// SSH transport for the BMC's command shell.
pub struct SshTransport {
    config: BmcConfig,
    ssh_config: Arc<client::Config>,
}

impl SshTransport {
    #[must_use]
    pub fn new(config: BmcConfig) -> Self {
        let ssh_config = client::Config {
            preferred: Preferred {
                kex: LEGACY_KEX.into(),
                key: HOST_KEY_ALGS.into(),
                ..Preferred::default()
            },
            ..client::Config::default()
        };
        Self {
            config,
            ssh_config: Arc::new(ssh_config),
        }
    }
}

#[async_trait]
impl BmcTransport for SshTransport {
    async fn connect(&self) -> Result<Box<dyn TransportSession>, TransportError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(
                self.ssh_config.clone(),
                (self.config.host.as_str(), self.config.port),
                AcceptAllHostKeys,
            ),
        )
        .await
        .map_err(|_| TransportError::Connect(addr.clone(), "handshake timed out".into()))?
        .map_err(|e| TransportError::Connect(addr, e.to_string()))?;

        match handle
            .authenticate_password(self.config.username.clone(), self.config.password.clone())
            .await?
        {
            AuthResult::Success => {}
            AuthResult::Failure { .. } => {
                return Err(TransportError::Auth(self.config.username.clone()));
            }
        }

        debug!("SSH session established to {}", self.config.host);
        Ok(Box::new(SshSession { handle }))
    }
}

/// Accepts any host key. See the module docs for why verification is off.
struct AcceptAllHostKeys;

impl client::Handler for AcceptAllHostKeys {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

struct SshSession {
    handle: Handle<AcceptAllHostKeys>,
}

#[async_trait]
impl TransportSession for SshSession {
    /// One exec channel per command — the firmware closes the channel after
    /// the response, so stdout and stderr are drained until EOF.
    async fn exec(&mut self, command: &str) -> Result<String, TransportError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut output = String::new();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    output.push_str(&String::from_utf8_lossy(data));
                }
                ChannelMsg::ExtendedData { ref data, .. } => {
                    output.push_str(&String::from_utf8_lossy(data));
                }
                _ => {}
            }
        }

        Ok(output)
    }

    async fn close(&mut self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}
