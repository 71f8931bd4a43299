//! Client config load/save for `~/.cic-chat/config.yaml`.
//! Sections: websocket.*, stream.*, display.*, language.*.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::StreamOptions;
use crate::render::RenderMode;

/// WebSocket section (endpoint, idle_timeout_secs).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct WebSocketSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Seconds without any delivery before the connection is closed; 0 disables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

/// Reassembly bounds (max_frame_bytes, frame_timeout_secs).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StreamSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frame_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_timeout_secs: Option<u64>,
}

/// Display section (allow_markdown).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DisplaySection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_markdown: Option<bool>,
}

/// Language section (selection, detect).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LanguageSection {
    /// Explicit selection; detection is skipped when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detect: Option<bool>,
}

/// Full client config.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub websocket: WebSocketSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub language: LanguageSection,
}

impl Config {
    /// Connection bounds, with defaults for unset fields.
    pub fn stream_options(&self) -> StreamOptions {
        let defaults = StreamOptions::default();
        StreamOptions {
            max_frame_bytes: self.stream.max_frame_bytes.unwrap_or(defaults.max_frame_bytes),
            frame_timeout: self
                .stream
                .frame_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.frame_timeout),
            idle_timeout: match self.websocket.idle_timeout_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.idle_timeout,
            },
        }
    }

    /// Markdown unless `display.allow_markdown` is false.
    pub fn render_mode(&self) -> RenderMode {
        match self.display.allow_markdown {
            Some(false) => RenderMode::Plain,
            _ => RenderMode::Markdown,
        }
    }

    /// Whether the prompt is run through the language detector.
    pub fn detect_language(&self) -> bool {
        self.language.detect.unwrap_or(true)
    }
}

/// Returns the default config file path: `~/.cic-chat/config.yaml` (platform-specific).
pub fn default_config_path() -> Option<PathBuf> {
    let home = home_dir()?;
    Some(home.join(".cic-chat").join("config.yaml"))
}

#[cfg(unix)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(windows)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE").map(PathBuf::from)
}

#[cfg(not(any(unix, windows)))]
fn home_dir() -> Option<PathBuf> {
    None
}

/// Load config from a YAML file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save config to a YAML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
    }
    let contents = serde_yaml::to_string(config).map_err(|source| ConfigError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, contents).map_err(write_err)
}

/// Config load/save error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to serialize config for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_stream_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.stream_options(), StreamOptions::default());
        assert_eq!(cfg.render_mode(), RenderMode::Markdown);
        assert!(cfg.detect_language());
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let mut cfg = Config::default();
        cfg.websocket.idle_timeout_secs = Some(0);
        assert_eq!(cfg.stream_options().idle_timeout, None);

        cfg.websocket.idle_timeout_secs = Some(5);
        assert_eq!(cfg.stream_options().idle_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn markdown_can_be_disabled() {
        let mut cfg = Config::default();
        cfg.display.allow_markdown = Some(false);
        assert_eq!(cfg.render_mode(), RenderMode::Plain);
    }
}
