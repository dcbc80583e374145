use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "AGENTBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/agentbox.toml";
const ENV_PREFIX: &str = "AGENTBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if it exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env if present; missing file is not an error
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);

    Ok(config)
}

/// Agent credentials come from the environment only, never from TOML.
fn load_secrets(config: &mut Config) {
    if let Ok(password) = env::var("AGENTBOX_AGENT_PASSWORD") {
        config.agent.password = Some(password);
    }
    if config.agent.password.is_none() {
        if let Ok(password) = env::var("OPENCODE_SERVER_PASSWORD") {
            config.agent.password = Some(password);
        }
    }
}

/// Load configuration from a specific path plus environment overrides.
/// `AGENTBOX__SERVER__BIND_ADDR` maps to `server.bind_addr`.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn loads_defaults_when_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.queue.workers, 4);
    }

    #[test]
    fn loads_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
data_root = "var/jobs"

[agent]
base_url = "http://agent:4096"
username = "ci"

[limits]
max_upload_bytes = "10MiB"
soft_deadline_secs = 600

[queue]
workers = 2
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.agent.base_url, "http://agent:4096");
        assert_eq!(config.limits.max_upload_bytes.as_u64(), 10 * 1024 * 1024);
        assert_eq!(config.limits.soft_deadline_secs, 600);
        assert_eq!(config.queue.workers, 2);
        // Untouched sections keep defaults
        assert_eq!(config.limits.hard_deadline_secs, 1200);
        assert_eq!(config.identity.default_tenant, "default");
    }
}
