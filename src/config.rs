use crate::llm::{ProviderKind, ProviderSettings};
use crate::shell::ShellTarget;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const CONFIG_FILE: &str = "config.json";
const HISTORY_FILE: &str = "history.db";

#[derive(Debug)]
pub enum ConfigError {
    NoHomeDir,
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, serde_json::Error),
    Serialize(String),
    UnknownProvider(String),
    MissingApiKey(ProviderKind),
    MissingModel,
    NoProvider,
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoHomeDir => write!(f, "Could not determine the home directory"),
            ConfigError::Io(path, e) => write!(f, "Cannot access {}: {}", path.display(), e),
            ConfigError::Parse(path, e) => write!(f, "Invalid config file {}: {}", path.display(), e),
            ConfigError::Serialize(msg) => write!(f, "Failed to serialize config: {}", msg),
            ConfigError::UnknownProvider(name) => write!(
                f,
                "Unknown provider '{}' (expected google or openai)",
                name
            ),
            ConfigError::MissingApiKey(kind) => write!(f, "No API key found for {}", kind),
            ConfigError::MissingModel => write!(f, "No model selected"),
            ConfigError::NoProvider => write!(f, "No provider is configured for this run"),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    /// What the user can do about it.
    pub fn hint(&self) -> Option<String> {
        match self {
            ConfigError::MissingApiKey(kind) => Some(format!(
                "set an API key with `linaix setup --provider {} --api-key <KEY>` or export {}",
                kind,
                kind.api_key_env_vars().join(" / ")
            )),
            ConfigError::MissingModel => Some(
                "pass --model <MODEL> or store one with `linaix setup --model <MODEL>`".to_string(),
            ),
            ConfigError::NoProvider => Some(
                "configure one with `linaix setup --api-key <KEY> --model <MODEL>`".to_string(),
            ),
            ConfigError::UnknownProvider(_) => {
                Some("use --provider google or --provider openai".to_string())
            }
            ConfigError::Parse(path, _) => Some(format!(
                "fix or delete {} to recreate the defaults",
                path.display()
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub provider: String,
    #[serde(alias = "api_key")]
    pub google_api_key: String,
    pub openai_api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub shell: ShellTarget,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub aliases: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            google_api_key: String::new(),
            openai_api_key: String::new(),
            model: None,
            shell: ShellTarget::Auto,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            command_timeout_secs: None,
            base_url: None,
            aliases: BTreeMap::new(),
        }
    }
}

/// Per-invocation values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// `~/.linaix`, or `$LINAIX_HOME` when set.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os("LINAIX_HOME") {
            return Ok(PathBuf::from(dir));
        }
        dirs::home_dir()
            .map(|home| home.join(".linaix"))
            .ok_or(ConfigError::NoHomeDir)
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::default_dir()?.join(CONFIG_FILE))
    }

    pub fn history_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::default_dir()?.join(HISTORY_FILE))
    }

    /// Parse config from a JSON string. Missing fields take their defaults.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from the default location, creating it on first run.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load config from `path`, writing a default file first if it is missing
    /// or empty.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let exists = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        if !exists {
            tracing::info!(path = %path.display(), "creating default config");
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_json(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    /// Write the config as pretty JSON, readable only by the owner.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| ConfigError::Io(dir.to_path_buf(), e))?;
                restrict_permissions(dir, 0o700)?;
            }
        }

        let contents = self
            .to_json()
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        restrict_permissions(path, 0o600)
    }

    pub fn provider_kind(&self, override_name: Option<&str>) -> Result<ProviderKind, ConfigError> {
        let name = override_name.unwrap_or(&self.provider);
        ProviderKind::parse(name).ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))
    }

    pub fn stored_api_key(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Google => &self.google_api_key,
            ProviderKind::OpenAi => &self.openai_api_key,
        }
    }

    pub fn set_api_key(&mut self, kind: ProviderKind, key: &str) {
        let key = key.trim().to_string();
        match kind {
            ProviderKind::Google => self.google_api_key = key,
            ProviderKind::OpenAi => self.openai_api_key = key,
        }
    }

    /// The key for `kind`: the stored one, else the first non-empty provider
    /// environment variable.
    pub fn resolve_api_key(&self, kind: ProviderKind) -> Result<String, ConfigError> {
        self.resolve_api_key_with(kind, |name| std::env::var(name).ok())
    }

    pub fn resolve_api_key_with(
        &self,
        kind: ProviderKind,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<String, ConfigError> {
        let stored = self.stored_api_key(kind).trim();
        if !stored.is_empty() {
            return Ok(stored.to_string());
        }
        kind.api_key_env_vars()
            .iter()
            .filter_map(|name| env(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .ok_or(ConfigError::MissingApiKey(kind))
    }

    /// Build the settings for the one provider this invocation will talk to.
    pub fn provider_settings(&self, overrides: &Overrides) -> Result<ProviderSettings, ConfigError> {
        self.provider_settings_with(overrides, |name| std::env::var(name).ok())
    }

    pub fn provider_settings_with(
        &self,
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ProviderSettings, ConfigError> {
        let kind = self.provider_kind(overrides.provider.as_deref())?;
        let model = overrides
            .model
            .clone()
            .or_else(|| self.model.clone())
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or(ConfigError::MissingModel)?;
        let timeout_secs = overrides.timeout_secs.unwrap_or(self.timeout_secs);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "timeout must be at least 1 second".to_string(),
            ));
        }
        let api_key = self.resolve_api_key_with(kind, env)?;

        Ok(ProviderSettings {
            kind,
            model,
            api_key,
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn add_alias(&mut self, name: &str, task: &str) -> Result<(), ConfigError> {
        let name = name.trim();
        let task = task.trim();
        if name.is_empty() || task.is_empty() {
            return Err(ConfigError::InvalidValue(
                "alias name and task must not be empty".to_string(),
            ));
        }
        self.aliases.insert(name.to_string(), task.to_string());
        Ok(())
    }

    pub fn remove_alias(&mut self, name: &str) -> bool {
        self.aliases.remove(name.trim()).is_some()
    }

    /// Expand `task` if it names an alias.
    pub fn resolve_task<'a>(&'a self, task: &'a str) -> &'a str {
        self.aliases
            .get(task.trim())
            .map(String::as_str)
            .unwrap_or(task)
    }

    /// The config as TOML with API keys masked, for display.
    pub fn to_display_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        shown.google_api_key = mask_key(&self.google_api_key);
        shown.openai_api_key = mask_key(&self.openai_api_key);
        toml::to_string_pretty(&shown).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

fn mask_key(key: &str) -> String {
    let key = key.trim();
    if key.is_empty() {
        return String::new();
    }
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if key.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{}", tail)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| ConfigError::Io(path.to_path_buf(), e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<(), ConfigError> {
    Ok(())
}
