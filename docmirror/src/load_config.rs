/// `load_config` module: reads the YAML application config, injects secrets
/// from the environment and validates the result.
///
/// # Responsibilities
/// - Locate the config file (`--config` or `<user config dir>/docmirror/config.yaml`)
/// - Parse it into [`AppConfig`]
/// - Fill empty secret fields from `CONFLUENCE_API_EMAIL`, `CONFLUENCE_API_TOKEN`
///   and `CONFLUENCE_ACCESS_TOKEN`
/// - Resolve [`Credentials`], failing early on an invalid auth setup
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{anyhow, Context, Result};
use docmirror_core::config::{AppConfig, Credentials};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const ENV_EMAIL: &str = "CONFLUENCE_API_EMAIL";
pub const ENV_API_TOKEN: &str = "CONFLUENCE_API_TOKEN";
pub const ENV_ACCESS_TOKEN: &str = "CONFLUENCE_ACCESS_TOKEN";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub app: AppConfig,
    pub credentials: Credentials,
}

/// `<user config dir>/docmirror/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| anyhow!("could not determine the user config directory"))?;
    Ok(base.join("docmirror").join("config.yaml"))
}

/// `path` when given, the default location otherwise.
pub fn resolve_config_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => default_config_path(),
    }
}

/// Parse the YAML file at `path` without validating it.
pub fn read_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!(
                "Failed to read config file {}: {e}. Run `docmirror config` to create one",
                path_ref.display()
            ));
        }
    };

    serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow!("Failed to parse config YAML {}: {e}", path_ref.display())
    })
}

/// Fill secrets the file leaves empty from the process environment.
pub fn inject_env_secrets(config: &mut AppConfig) {
    let remote = &mut config.remote;
    for (field, var) in [
        (&mut remote.email, ENV_EMAIL),
        (&mut remote.api_token, ENV_API_TOKEN),
        (&mut remote.access_token, ENV_ACCESS_TOKEN),
    ] {
        if field.is_empty() {
            if let Ok(value) = std::env::var(var) {
                info!(env = var, "Using secret from environment");
                *field = value;
            }
        }
    }
}

/// Read, complete and validate the application config.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let mut app = read_config(&path)?;
    inject_env_secrets(&mut app);
    let credentials = app
        .remote
        .validate()
        .with_context(|| format!("Invalid config {}", path.as_ref().display()))?;
    app.trace_loaded();
    Ok(CliConfig { app, credentials })
}

/// Write `config` as YAML, creating parent directories.
pub fn write_config<P: AsRef<Path>>(path: P, config: &AppConfig) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialise config")?;
    fs::write(path, yaml).with_context(|| format!("Failed to write config {}", path.display()))?;
    info!(config_path = %path.display(), "Config written");
    Ok(())
}
