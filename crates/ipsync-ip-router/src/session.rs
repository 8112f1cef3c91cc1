//! SSH plumbing for the router provider
//!
//! Connect, verify the host key, authenticate with whatever credentials are
//! configured, run one command and collect its combined output.

use async_trait::async_trait;
use ipsync_core::{Error, Result};
use russh::client::{self, Handle, KeyboardInteractiveAuthResponse};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Keyboard-interactive rounds answered before giving up
const MAX_INTERACTIVE_ROUNDS: usize = 5;

/// How the server's host key is checked
#[derive(Clone)]
pub enum HostKeyPolicy {
    /// Accept only this key
    Pinned(PublicKey),
    /// Accept any key (explicit opt-in)
    Insecure,
}

impl HostKeyPolicy {
    /// Build the policy from the configured pin
    ///
    /// A missing pin is refused unless `insecure` is set.
    pub fn new(host: &str, host_key: Option<&str>, insecure: bool) -> Result<Self> {
        match host_key {
            Some(encoded) => russh_keys::parse_public_key_base64(encoded.trim())
                .map(HostKeyPolicy::Pinned)
                .map_err(|e| Error::config(format!("invalid host_key for {host}: {e}"))),
            None if insecure => Ok(HostKeyPolicy::Insecure),
            None => Err(Error::config(format!(
                "no host_key configured for {host}; refusing to connect unverified"
            ))),
        }
    }
}

/// One way of proving who we are
pub enum Credential {
    Key(Arc<KeyPair>),
    Password(String),
    KeyboardInteractive(String),
}

impl Credential {
    fn method(&self) -> &'static str {
        match self {
            Credential::Key(_) => "publickey",
            Credential::Password(_) => "password",
            Credential::KeyboardInteractive(_) => "keyboard-interactive",
        }
    }
}

/// Where to connect and as whom
pub struct Target<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
}

struct Verifier {
    host: String,
    policy: HostKeyPolicy,
    mismatch: Arc<AtomicBool>,
}

#[async_trait]
impl client::Handler for Verifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::Pinned(expected) => {
                let matches = expected.fingerprint() == server_public_key.fingerprint();
                if !matches {
                    warn!(
                        "Host key for {} does not match the pinned key (got {})",
                        self.host,
                        server_public_key.fingerprint()
                    );
                    self.mismatch.store(true, Ordering::SeqCst);
                }
                Ok(matches)
            }
            HostKeyPolicy::Insecure => {
                warn!(
                    "Accepting unverified host key {} from {}",
                    server_public_key.fingerprint(),
                    self.host
                );
                Ok(true)
            }
        }
    }
}

/// An authenticated SSH session
pub struct Session {
    handle: Handle<Verifier>,
    host: String,
}

impl Session {
    /// Connect, verify the host key and authenticate
    ///
    /// Credentials are tried in order; the first accepted one wins.
    pub async fn open(
        target: &Target<'_>,
        policy: HostKeyPolicy,
        credentials: &[Credential],
    ) -> Result<Self> {
        let mismatch = Arc::new(AtomicBool::new(false));
        let verifier = Verifier {
            host: target.host.to_string(),
            policy,
            mismatch: Arc::clone(&mismatch),
        };

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, (target.host, target.port), verifier)
            .await
            .map_err(|e| {
                if mismatch.load(Ordering::SeqCst) {
                    Error::HostKeyMismatch {
                        host: target.host.to_string(),
                    }
                } else {
                    Error::upstream(format!(
                        "SSH connection to {}:{} failed: {e}",
                        target.host, target.port
                    ))
                }
            })?;

        for credential in credentials {
            let accepted = match credential {
                Credential::Key(pair) => {
                    handle
                        .authenticate_publickey(target.user, Arc::clone(pair))
                        .await
                }
                Credential::Password(password) => {
                    handle
                        .authenticate_password(target.user, password.as_str())
                        .await
                }
                Credential::KeyboardInteractive(password) => {
                    keyboard_interactive(&mut handle, target.user, password).await
                }
            }
            .map_err(|e| Error::upstream(format!("SSH authentication exchange failed: {e}")))?;

            if accepted {
                debug!("Authenticated to {} via {}", target.host, credential.method());
                return Ok(Self {
                    handle,
                    host: target.host.to_string(),
                });
            }
            debug!("{} rejected {} authentication", target.host, credential.method());
        }

        Err(Error::auth(format!(
            "{} rejected all {} configured method(s) for user {}",
            target.host,
            credentials.len(),
            target.user
        )))
    }

    /// Run `command` and return stdout and stderr together
    ///
    /// A non-zero exit status is an error carrying the output.
    pub async fn exec(&mut self, command: &str) -> Result<String> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::upstream(format!("SSH session on {} failed: {e}", self.host)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::upstream(format!("SSH exec on {} failed: {e}", self.host)))?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(message) = channel.wait().await {
            match message {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        let text = String::from_utf8_lossy(&output).into_owned();
        match exit_status {
            Some(code) if code != 0 => Err(Error::upstream(format!(
                "command on {} exited with {}: {}",
                self.host,
                code,
                text.trim()
            ))),
            _ => Ok(text),
        }
    }

    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("SSH disconnect from {} failed: {}", self.host, e);
        }
    }
}

/// Answer every prompt with the password until the server decides
async fn keyboard_interactive(
    handle: &mut Handle<Verifier>,
    user: &str,
    password: &str,
) -> std::result::Result<bool, russh::Error> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(user, None)
        .await?;

    for _ in 0..MAX_INTERACTIVE_ROUNDS {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                debug!("Answering {} keyboard-interactive prompt(s)", prompts.len());
                let answers = vec![password.to_string(); prompts.len()];
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await?;
            }
        }
    }

    Ok(false)
}
