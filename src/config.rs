use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::github::{parse_repo_url, MergeMethod};
use reqwest::Url;

pub const DEFAULT_CONFIG_FILE: &str = ".automerge.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("GitHub token not found: set GITHUB_TOKEN or [github].token")]
    MissingToken,

    #[error("Invalid merge method {0:?}: expected merge, squash or rebase")]
    InvalidMergeMethod(String),

    #[error("Invalid value {value:?} for {name}: expected true or false")]
    InvalidBool { name: &'static str, value: String },

    #[error("Poll interval must be at least one second")]
    InvalidInterval,

    #[error("No repositories configured")]
    NoRepositories,

    #[error("Invalid repository {0:?}")]
    InvalidRepository(String),
}

/// Top-level configuration loaded from .automerge.toml.
///
/// Every field is optional in the file; `resolve` enforces what is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub automerge: AutomergeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutomergeConfig {
    pub label: Option<String>,
    pub priority_label: Option<String>,
    /// merge | squash | rebase
    pub merge_method: Option<String>,
    /// Merge UNSTABLE pull requests without looking at non-required checks
    pub ignore_optional_statuses: Option<bool>,
    pub interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// Per-repository decision settings, cloned into every repository task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub automerge_label: String,
    pub priority_label: String,
    pub merge_method: MergeMethod,
    pub ignore_optional_statuses: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            automerge_label: "Automerge".to_string(),
            priority_label: "Priority Automerge".to_string(),
            merge_method: MergeMethod::Merge,
            ignore_optional_statuses: false,
        }
    }
}

/// Validated configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub token: String,
    pub policy: Policy,
    pub interval: Duration,
    pub request_timeout: Duration,
    /// API base URL per repository
    pub repositories: Vec<Url>,
}

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

impl Config {
    /// Load configuration from `path`, or from .automerge.toml in the current
    /// directory. A missing default file yields the default config.
    /// Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_from(path)?
                } else {
                    Config::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// GITHUB_TOKEN only fills in a token the file did not set; every other
    /// variable wins over the file.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if self.github.token.is_none() {
            self.github.token = lookup("GITHUB_TOKEN");
        }

        let automerge = &mut self.automerge;
        if let Some(label) = lookup("AUTOMERGE_LABEL") {
            automerge.label = Some(label);
        }
        if let Some(label) = lookup("PRIORITY_LABEL") {
            automerge.priority_label = Some(label);
        }
        if let Some(method) = lookup("MERGE_TYPE") {
            automerge.merge_method = Some(method);
        }
        if let Some(repos) = lookup("AUTOMERGE_REPOSITORIES") {
            automerge.repositories = repos
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = lookup("OPTIONAL_STATUSES") {
            automerge.ignore_optional_statuses = Some(parse_bool("OPTIONAL_STATUSES", &raw)?);
        }
        Ok(())
    }

    /// Validate and produce the settings the bot runs with.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let token = self
            .github
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let automerge = &self.automerge;
        let merge_method = match &automerge.merge_method {
            Some(raw) => raw
                .parse::<MergeMethod>()
                .map_err(ConfigError::InvalidMergeMethod)?,
            None => MergeMethod::Merge,
        };

        let defaults = Policy::default();
        let policy = Policy {
            automerge_label: automerge.label.clone().unwrap_or(defaults.automerge_label),
            priority_label: automerge
                .priority_label
                .clone()
                .unwrap_or(defaults.priority_label),
            merge_method,
            ignore_optional_statuses: automerge.ignore_optional_statuses.unwrap_or(false),
        };

        let interval_secs = automerge.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS);
        if interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        if automerge.repositories.is_empty() {
            return Err(ConfigError::NoRepositories);
        }
        let repositories = automerge
            .repositories
            .iter()
            .map(|r| parse_repo_url(r).map_err(|_| ConfigError::InvalidRepository(r.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Settings {
            token,
            policy,
            interval: Duration::from_secs(interval_secs),
            request_timeout: Duration::from_secs(
                automerge.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            repositories,
        })
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    fn minimal() -> Config {
        let mut config = Config::default();
        config.github.token = Some("t0ken".to_string());
        config.automerge.repositories = vec!["org/repo".to_string()];
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.github.token.is_none());
        assert!(config.automerge.repositories.is_empty());
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[github]
token = "abc"

[automerge]
label = "Ship It"
merge_method = "squash"
ignore_optional_statuses = true
interval_secs = 120
repositories = ["org/one", "https://github.com/org/two"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let settings = config.resolve().unwrap();

        assert_eq!(settings.token, "abc");
        assert_eq!(settings.policy.automerge_label, "Ship It");
        assert_eq!(settings.policy.priority_label, "Priority Automerge");
        assert_eq!(settings.policy.merge_method, MergeMethod::Squash);
        assert!(settings.policy.ignore_optional_statuses);
        assert_eq!(settings.interval, Duration::from_secs(120));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.repositories.len(), 2);
        assert_eq!(
            settings.repositories[1].as_str(),
            "https://api.github.com/repos/org/two"
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = minimal();
        config.automerge.merge_method = Some("merge".to_string());
        config.apply_env(env(&[
            ("GITHUB_TOKEN", "ignored"),
            ("AUTOMERGE_LABEL", "bot:merge"),
            ("MERGE_TYPE", "rebase"),
            ("OPTIONAL_STATUSES", "1"),
            ("AUTOMERGE_REPOSITORIES", "a/b, c/d ,"),
        ]))
        .unwrap();

        let settings = config.resolve().unwrap();
        assert_eq!(settings.token, "t0ken");
        assert_eq!(settings.policy.automerge_label, "bot:merge");
        assert_eq!(settings.policy.merge_method, MergeMethod::Rebase);
        assert!(settings.policy.ignore_optional_statuses);
        assert_eq!(settings.repositories.len(), 2);
    }

    #[test]
    fn test_token_from_env() {
        let mut config = minimal();
        config.github.token = None;
        config.apply_env(env(&[("GITHUB_TOKEN", "from-env")])).unwrap();
        assert_eq!(config.resolve().unwrap().token, "from-env");
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let mut config = minimal();
        config.github.token = None;
        config.apply_env(env(&[])).unwrap();
        assert!(matches!(config.resolve(), Err(ConfigError::MissingToken)));
    }

    #[test]
    fn test_invalid_merge_method_is_fatal() {
        let mut config = minimal();
        config.apply_env(env(&[("MERGE_TYPE", "octopus")])).unwrap();
        match config.resolve() {
            Err(ConfigError::InvalidMergeMethod(raw)) => assert_eq!(raw, "octopus"),
            other => panic!("expected InvalidMergeMethod, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_bool_is_fatal() {
        let mut config = minimal();
        let result = config.apply_env(env(&[("OPTIONAL_STATUSES", "maybe")]));
        assert!(matches!(result, Err(ConfigError::InvalidBool { .. })));
    }

    #[test]
    fn test_repositories_required_and_validated() {
        let mut config = minimal();
        config.automerge.repositories.clear();
        assert!(matches!(config.resolve(), Err(ConfigError::NoRepositories)));

        config.automerge.repositories = vec!["nope".to_string()];
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::InvalidRepository(_))
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = minimal();
        config.automerge.interval_secs = Some(0);
        assert!(matches!(config.resolve(), Err(ConfigError::InvalidInterval)));

        config.automerge.interval_secs = Some(1);
        assert_eq!(config.resolve().unwrap().interval, Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join("automerge-bot-config-test.toml");
        std::fs::write(&path, "[automerge]\nrepositories = [\"org/repo\"]\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.automerge.repositories, vec!["org/repo".to_string()]);

        std::fs::remove_file(&path).ok();
    }
}
