//! Credential collaborator interface.
//!
//! The vault that stores exchange secrets lives outside this workspace. The
//! aggregator only asks it for the decrypted secret of a named source and never
//! persists or logs what it gets back.

use crate::records::SourceId;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Decrypted API credential for one source.
pub struct Credential {
    api_key: String,
    api_secret: SecretString,
    passphrase: Option<SecretString>,
}

impl Credential {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
            passphrase: None,
        }
    }

    /// Adds a passphrase (OKX-style three-part credentials).
    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::from(passphrase.into()));
        self
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn api_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }

    #[must_use]
    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_ref().map(|p| p.expose_secret())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("has_passphrase", &self.passphrase.is_some())
            .finish()
    }
}

/// Source of decrypted credentials, keyed by source id.
pub trait CredentialProvider: Send + Sync {
    fn get_secret(&self, source_id: &SourceId) -> Option<Arc<Credential>>;
}

/// In-memory credentials, handed over by an unlocked vault or a test.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    secrets: HashMap<SourceId, Arc<Credential>>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source_id: impl Into<SourceId>, credential: Credential) -> Self {
        self.secrets.insert(source_id.into(), Arc::new(credential));
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn get_secret(&self, source_id: &SourceId) -> Option<Arc<Credential>> {
        self.secrets.get(source_id).cloned()
    }
}

/// Reads `<SOURCE>_API_KEY`, `<SOURCE>_API_SECRET` and optional
/// `<SOURCE>_PASSPHRASE` from the environment.
///
/// The source id is upper-cased and `-` becomes `_`, so `okx-main` reads
/// `OKX_MAIN_API_KEY`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl EnvCredentials {
    #[must_use]
    pub fn env_prefix(source_id: &SourceId) -> String {
        source_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }
}

impl CredentialProvider for EnvCredentials {
    fn get_secret(&self, source_id: &SourceId) -> Option<Arc<Credential>> {
        let prefix = Self::env_prefix(source_id);
        let api_key = std::env::var(format!("{prefix}_API_KEY")).ok()?;
        let api_secret = std::env::var(format!("{prefix}_API_SECRET")).ok()?;

        let mut credential = Credential::new(api_key, api_secret);
        if let Ok(passphrase) = std::env::var(format!("{prefix}_PASSPHRASE")) {
            credential = credential.with_passphrase(passphrase);
        }
        Some(Arc::new(credential))
    }
}
