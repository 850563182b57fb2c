//! Application settings persistence.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/jupyter-web/settings.json
//! - Linux: ~/.config/jupyter-web/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\jupyter-web\settings.json
//!
//! `$JUPYTER_WEB_BACKEND` overrides the stored backend URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::autosave::{default_autosave_path, AutosaveStore, Autosaver};
use crate::execution::{DEFAULT_RUN_ALL_STAGGER, INSTALL_TIMEOUT};
use crate::markdown::MarkdownRenderer;
use crate::session::SessionConfig;

fn default_autosave_interval_secs() -> u64 {
    300
}

fn default_run_all_stagger_ms() -> u64 {
    DEFAULT_RUN_ALL_STAGGER.as_millis() as u64
}

/// Application settings for notebook sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Execution backend base URL (e.g. `http://localhost:5000/api`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,

    /// Seconds between autosave snapshots; 0 disables autosave
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,

    /// Delay between dispatches when running all cells
    #[serde(default = "default_run_all_stagger_ms")]
    pub run_all_stagger_ms: u64,

    #[serde(default)]
    pub markdown_renderer: MarkdownRenderer,

    /// Where autosave snapshots go; defaults to the user data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autosave_path: Option<PathBuf>,

    /// Local directory for saves when the backend cannot take them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend_url: None,
            autosave_interval_secs: default_autosave_interval_secs(),
            run_all_stagger_ms: default_run_all_stagger_ms(),
            markdown_renderer: MarkdownRenderer::default(),
            autosave_path: None,
            save_dir: None,
        }
    }
}

impl AppSettings {
    /// Backend URL with the environment override applied.
    pub fn backend_url(&self) -> String {
        match std::env::var(kernel_client::BACKEND_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => url,
            _ => self
                .backend_url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| kernel_client::DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_interval_secs > 0).then(|| Duration::from_secs(self.autosave_interval_secs))
    }

    pub fn autosave_store(&self) -> AutosaveStore {
        AutosaveStore::new(
            self.autosave_path
                .clone()
                .unwrap_or_else(default_autosave_path),
        )
    }

    /// The periodic snapshotter these settings describe, or `None` when
    /// autosave is disabled.
    pub fn autosaver(&self) -> Option<Autosaver> {
        self.autosave_interval()
            .map(|interval| Autosaver::new(self.autosave_store(), interval))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            markdown_renderer: self.markdown_renderer,
            run_all_stagger: Duration::from_millis(self.run_all_stagger_ms),
            install_timeout: INSTALL_TIMEOUT,
            save_dir: self.save_dir.clone(),
        }
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jupyter-web")
        .join("settings.json")
}

/// Load settings from disk, returning defaults if file doesn't exist
pub fn load_settings() -> AppSettings {
    load_settings_from(&settings_path())
}

pub fn load_settings_from(path: &Path) -> AppSettings {
    if path.exists() {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| match serde_json::from_str(&s) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    log::warn!("[settings] Ignoring unreadable {}: {}", path.display(), e);
                    None
                }
            })
            .unwrap_or_default()
    } else {
        AppSettings::default()
    }
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) -> Result<()> {
    save_settings_to(&settings_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
