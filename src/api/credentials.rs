//! API credential loading.
//!
//! Secrets are wrapped in `SecretString` so they never reach a log line
//! through `Debug` and are zeroed on drop.

use secrecy::{ExposeSecret, SecretString};
use std::path::Path;

use crate::error::TraderError;

/// File names for key, secret and passphrase inside a credentials directory
pub const CREDENTIAL_FILES: [&str; 3] = ["cb_file1.bin", "cb_file2.bin", "cb_file3.bin"];

const ENV_API_KEY: &str = "COINBASE_API_KEY";
const ENV_API_SECRET: &str = "COINBASE_API_SECRET";
const ENV_API_PASSPHRASE: &str = "COINBASE_API_PASSPHRASE";

/// Exchange API key, secret and passphrase
pub struct ApiCredentials {
    api_key: String,
    secret: SecretString,
    passphrase: SecretString,
}

impl ApiCredentials {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: SecretString::from(secret.into()),
            passphrase: SecretString::from(passphrase.into()),
        }
    }

    /// Load credentials from the environment (after reading `.env` if present)
    pub fn from_env() -> Result<Self, TraderError> {
        dotenvy::dotenv().ok();

        let read = |name: &str| {
            std::env::var(name)
                .map_err(|_| TraderError::Credentials(format!("{} is not set", name)))
        };

        let api_key = read(ENV_API_KEY)?;
        let secret = read(ENV_API_SECRET)?;
        let passphrase = read(ENV_API_PASSPHRASE)?;

        Ok(Self::new(api_key, secret, passphrase))
    }

    /// Load credentials from the three files in `dir`
    ///
    /// Surrounding whitespace (including a trailing newline) is stripped.
    pub fn from_files(dir: &Path) -> Result<Self, TraderError> {
        let [key_file, secret_file, passphrase_file] = CREDENTIAL_FILES;

        let api_key = read_trimmed(&dir.join(key_file))?;
        let secret = read_trimmed(&dir.join(secret_file))?;
        let passphrase = read_trimmed(&dir.join(passphrase_file))?;

        Ok(Self::new(api_key, secret, passphrase))
    }

    /// The API key (public, safe to log)
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Only for request signing; never log the return value
    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Only for request headers; never log the return value
    pub fn expose_passphrase(&self) -> &str {
        self.passphrase.expose_secret()
    }
}

fn read_trimmed(path: &Path) -> Result<String, TraderError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        TraderError::Credentials(format!("failed to read {}: {}", path.display(), e))
    })?;
    let value = raw.trim().to_string();
    if value.is_empty() {
        return Err(TraderError::Credentials(format!(
            "{} is empty",
            path.display()
        )));
    }
    Ok(value)
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}
