use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{filter::Directive, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, CONFIG_FILE_NAME};

/// Log targets used by the bridge crate, addressable from the debug selector.
pub const BRIDGE_TARGETS: &[&str] = &[
    "bridge-codec",
    "bridge-registry",
    "bridge-queue",
    "bridge-lifecycle",
    "bridge-router",
    "bridge-endpoint",
    "bridge-runtime",
];

/// Expands a comma-separated debug selector into bridge log targets.
///
/// Tokens are trimmed and lose a trailing `.`; blanks are skipped. `queue` and
/// `bridge-queue` name the same target. `*` selects every bridge target.
pub fn debug_targets(selector: &str) -> Vec<String> {
    let tokens: Vec<&str> = selector
        .split(',')
        .map(|token| token.trim().trim_end_matches('.').trim())
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.contains(&"*") {
        return BRIDGE_TARGETS.iter().map(|target| target.to_string()).collect();
    }

    let mut targets: Vec<String> = Vec::new();
    for token in tokens {
        let target = if token.starts_with("bridge-") {
            token.to_string()
        } else {
            format!("bridge-{token}")
        };
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

pub fn init_logging(level: &str, debug: bool, json: bool, debug_selector: Option<&str>) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    for target in debug_selector.map(debug_targets).unwrap_or_default() {
        let directive: Directive = format!("{target}=debug")
            .parse()
            .with_context(|| format!("invalid debug target {target:?}"))?;
        filter = filter.add_directive(directive);
    }

    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;

    Ok(())
}

pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub from_file: bool,
}

impl LoadedConfig {
    /// Reports where the configuration came from. Call once logging is up.
    pub fn log_source(&self) {
        if self.from_file {
            info!("Loaded configuration from: {}", self.path.display());
        } else {
            warn!("Config file not found, using defaults: {}", self.path.display());
        }
    }
}

/// Resolves the config path and reads it. A missing file yields defaults.
///
/// Runs before logging is installed, so it does not log; see [`LoadedConfig::log_source`].
pub async fn load_config(config_path: Option<&Path>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if fs::try_exists(&config_path).await.unwrap_or(false) {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
        Ok(LoadedConfig {
            config,
            path: config_path,
            from_file: true,
        })
    } else {
        Ok(LoadedConfig {
            config: AppConfig::default(),
            path: config_path,
            from_file: false,
        })
    }
}

// Priority: ./config/webview-bridge.yaml > ~/.config/soulbrowser/webview-bridge.yaml
fn default_config_path() -> Result<PathBuf> {
    let local_config = Path::new("config").join(CONFIG_FILE_NAME);
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("soulbrowser");
    path.push(CONFIG_FILE_NAME);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn selector_tokens_are_normalized() {
        assert_eq!(
            debug_targets(" queue., bridge-router ,, queue "),
            vec!["bridge-queue".to_string(), "bridge-router".to_string()]
        );
        assert!(debug_targets(" , ").is_empty());
    }

    #[test]
    fn wildcard_selects_every_target() {
        assert_eq!(debug_targets("router,*").len(), BRIDGE_TARGETS.len());
    }

    #[tokio::test]
    async fn explicit_path_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bridge:\n  max_queued_outbound_messages: 4\nlogging:\n  json: true").unwrap();

        let loaded = load_config(Some(file.path())).await.unwrap();
        assert!(loaded.from_file);
        assert_eq!(loaded.config.bridge.max_queued_outbound_messages, Some(4));
        assert!(loaded.config.logging.json);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("absent.yaml"))).await.unwrap();
        assert!(!loaded.from_file);
        assert_eq!(loaded.config, AppConfig::default());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bridge: [not, a, map]").unwrap();
        assert!(load_config(Some(file.path())).await.is_err());
    }
}
