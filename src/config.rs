//! Configuration manager for ldap-check.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REQUEST_TIMEOUT: u64 = 30;
const DEFAULT_LDAP_TIMEOUT: u64 = 5;

/// Errors raised while checking a loaded configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`{field}` must be greater than zero")]
    ZeroTimeout { field: &'static str },
    #[error(
        "`request_timeout` ({request}s) must exceed the directory budget of \
         {directory}s so the connection is always closed"
    )]
    RequestTimeout { request: u64, directory: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Listening port, `PORT` environment variable takes precedence.
    pub port: u16,
    /// Maximum duration of a whole HTTP request, in seconds.
    pub request_timeout: u64,
    /// Use distinct HTTP status codes per failure kind instead of `400`.
    pub detailed_status: bool,
    #[serde(skip_deserializing)]
    pub version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to the directory client.
    #[serde(skip_serializing)]
    pub ldap: Ldap,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            port: DEFAULT_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            detailed_status: false,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            ldap: Ldap::default(),
        }
    }
}

/// Directory client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ldap {
    /// Seconds allowed to open the connection (TCP and TLS).
    pub connect_timeout: u64,
    /// Seconds allowed for every bind, search and unbind.
    pub operation_timeout: u64,
    /// Upgrade plain `ldap://` connections with StartTLS.
    pub starttls: bool,
    /// Check the server certificate.
    pub tls_verify: bool,
}

impl Default for Ldap {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_LDAP_TIMEOUT,
            operation_timeout: DEFAULT_LDAP_TIMEOUT,
            starttls: false,
            tls_verify: true,
        }
    }
}

impl Ldap {
    /// Bind, search, bind and unbind.
    const OPERATIONS: u64 = 4;

    /// Longest time one verification can spend talking to the directory.
    pub fn budget(&self) -> u64 {
        let operations =
            self.operation_timeout.saturating_mul(Self::OPERATIONS);
        self.connect_timeout.saturating_add(operations)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout)
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Self>(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        config.version = VERSION.to_owned();
        config.path = file_path;
        config.validate()?;

        Ok(Arc::new(config))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("request_timeout", self.request_timeout),
            ("ldap.connect_timeout", self.ldap.connect_timeout),
            ("ldap.operation_timeout", self.ldap.operation_timeout),
        ];

        if let Some((field, _)) =
            timeouts.into_iter().find(|(_, value)| *value == 0)
        {
            return Err(ConfigError::ZeroTimeout { field });
        }

        let directory = self.ldap.budget();
        if self.request_timeout <= directory {
            return Err(ConfigError::RequestTimeout {
                request: self.request_timeout,
                directory,
            });
        }

        Ok(())
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(
            error = %err,
            path = %self.path.display(),
            "configuration file cannot be used, falling back to defaults"
        );
        Self::default()
    }
}
