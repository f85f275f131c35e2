use std::path::Path;

use serde::{Deserialize, Serialize};

use rp2040lib::LinkConfig;

/// Contents of the optional `--config` TOML file.
///
/// ```toml
/// [link]
/// response_timeout_ms = 500
///
/// [serial]
/// port = "/dev/ttyACM0"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub link: LinkConfig,
    pub serial: SerialConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub plain_file: bool,
    pub tcp: bool,
}

impl ToolConfig {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.link.validate()?;
        Ok(config)
    }

    /// Load from `path`, or use defaults when there is no file.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("could not read {}: {}", path.display(), e))?;
        let config = Self::parse(&text)
            .map_err(|e| anyhow::anyhow!("bad config {}: {}", path.display(), e))?;
        log::debug!("loaded {}: {:?}", path.display(), config);
        Ok(config)
    }
}
