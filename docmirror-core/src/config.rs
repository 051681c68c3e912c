use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl AppConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            remote: RemoteConfig {
                base_url: base_url.into(),
                auth_type: AuthType::Basic.to_string(),
                ..RemoteConfig::default()
            },
            output: OutputConfig::default(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            base_url = %self.remote.base_url,
            auth_type = %self.remote.auth_type,
            image_dir = %self.output.image_dir,
            title_as_filename = self.output.title_as_filename,
            "Loaded AppConfig"
        );
        debug!(output = ?self.output, "AppConfig output section");
    }
}

/// Authentication scheme used against the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    /// Account email plus API token.
    Basic,
    /// Pre-issued access token sent as a bearer header.
    Bearer,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthType::Basic => f.write_str("basic"),
            AuthType::Bearer => f.write_str("bearer"),
        }
    }
}

impl FromStr for AuthType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "basic" => Ok(AuthType::Basic),
            "bearer" => Ok(AuthType::Bearer),
            other => Err(ConfigError::InvalidAuthType(other.to_owned())),
        }
    }
}

/// Resolved credentials, produced by [`RemoteConfig::validate`].
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { email: String, api_token: String },
    Bearer { access_token: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { email, .. } => f
                .debug_struct("Basic")
                .field("email", email)
                .field("api_token", &"<redacted>")
                .finish(),
            Credentials::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("access_token", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub auth_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("auth_type", &self.auth_type)
            .field("email", &self.email)
            .field("api_token_set", &!self.api_token.is_empty())
            .field("access_token_set", &!self.access_token.is_empty())
            .finish()
    }
}

impl RemoteConfig {
    /// Check the section and resolve credentials.
    ///
    /// An empty `auth_type` is normalised to `basic`.
    pub fn validate(&mut self) -> Result<Credentials, ConfigError> {
        let auth_type = self.auth_type.parse::<AuthType>()?;
        self.auth_type = auth_type.to_string();

        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }

        match auth_type {
            AuthType::Basic => {
                if self.email.is_empty() || self.api_token.is_empty() {
                    return Err(ConfigError::MissingCredentials {
                        auth_type: "basic",
                        fields: "email and api_token are",
                    });
                }
                Ok(Credentials::Basic {
                    email: self.email.clone(),
                    api_token: self.api_token.clone(),
                })
            }
            AuthType::Bearer => {
                if self.access_token.is_empty() {
                    return Err(ConfigError::MissingCredentials {
                        auth_type: "bearer",
                        fields: "access_token is",
                    });
                }
                Ok(Credentials::Bearer {
                    access_token: self.access_token.clone(),
                })
            }
        }
    }
}

/// How mirrored documents are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for downloaded assets, relative to each document's directory.
    pub image_dir: String,
    /// Name files after the document title instead of its token.
    pub title_as_filename: bool,
    pub skip_img_download: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            image_dir: "static".to_owned(),
            title_as_filename: false,
            skip_img_download: false,
        }
    }
}
