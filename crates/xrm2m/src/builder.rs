//! Client configuration

use std::path::PathBuf;
use std::time::Duration;
use xrm2m_ssh::{Preamble, SshConfig};

#[cfg(feature = "ssh2")]
use crate::{client::SshClient, Result};

/// Builder for configuring connections
pub struct ClientBuilder {
    /// Target connection string
    target: String,
    /// SSH configuration
    ssh_config: SshConfig,
}

impl ClientBuilder {
    /// Create a builder for a `[user@]host[:port]` target
    pub fn new(target: impl Into<String>) -> Self {
        let target = target.into();
        let ssh_config = SshConfig::for_target(&target);
        Self { target, ssh_config }
    }

    /// Target this builder was created for
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Set the login user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.ssh_config.credentials.user = user.into();
        self
    }

    /// Authenticate with a password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.ssh_config.credentials.password = Some(password.into());
        self
    }

    /// Authenticate with a private key file
    pub fn with_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.ssh_config.credentials.key_path = Some(key_path.into());
        self
    }

    /// Run a different remote command
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.ssh_config.command = command.into();
        self
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ssh_config.connect_timeout = timeout.as_secs();
        self
    }

    /// Replace the cipher preference list
    pub fn with_ciphers<I, S>(mut self, ciphers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ssh_config.ciphers = ciphers.into_iter().map(Into::into).collect();
        self
    }

    /// Choose how the startup preamble is discarded
    pub fn with_preamble(mut self, preamble: Preamble) -> Self {
        self.ssh_config.preamble = preamble;
        self
    }

    /// Set the idle poll interval of the SSH channel
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.ssh_config.poll_interval_ms = interval.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Build the SSH configuration
    pub fn build_config(self) -> SshConfig {
        self.ssh_config
    }

    /// Connect and create the client
    #[cfg(feature = "ssh2")]
    pub async fn connect(self) -> Result<SshClient> {
        SshClient::connect_with(&self.ssh_config).await
    }
}
