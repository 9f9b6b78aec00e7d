use std::path::{Path, PathBuf};

use anyhow::Result;
use webview_bridge::BridgeOptions;

use crate::config::AppConfig;

pub struct CliContext {
    config: AppConfig,
    config_path: PathBuf,
    from_file: bool,
}

impl CliContext {
    pub fn new(config: AppConfig, config_path: PathBuf, from_file: bool) -> Self {
        Self {
            config,
            config_path,
            from_file,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_from_file(&self) -> bool {
        self.from_file
    }

    pub fn bridge_options(&self) -> Result<BridgeOptions> {
        self.config.bridge_options()
    }
}
