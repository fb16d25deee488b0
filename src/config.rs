//! Configuration of the [`Authenticator`](crate::authenticator::Authenticator).
//!
//! The configuration is usually read from TOML:
//!
//! ```toml
//! sudo_cookie = "sling.sudo"
//! sudo_parameter = "sudo"
//! anonymous_allowed = false
//! cache_control = true
//! requirements = ["+/content", "-/content/public", { path = "/apps", required = true }]
//! ```
//!
//! The property names used by earlier deployments (`"auth.sudo.cookie"`, `"auth.sudo.parameter"`,
//! `"auth.annonymous"` and `"sling.auth.requirements"`) are accepted as well. Being dotted, they
//! must be quoted in TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::holder::AuthenticationRequirementHolder;
use crate::sudo::{SudoSettings, DEFAULT_COOKIE, DEFAULT_PARAMETER};

/// ConfigError describes a configuration that could not be loaded
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// One configured authentication requirement
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequirementEntry {
    /// `+/path` or `/path` requires authentication below the path, `-/path` allows anonymous
    /// access
    Pattern(String),
    Explicit {
        path: String,
        #[serde(default = "default_true")]
        required: bool,
    },
}

impl RequirementEntry {
    /// Converts the entry into a holder. Returns `None` for entries with a blank path
    pub fn to_holder(&self, source: &str) -> Option<AuthenticationRequirementHolder> {
        match self {
            RequirementEntry::Pattern(p) => AuthenticationRequirementHolder::from_config(p, source),
            RequirementEntry::Explicit { path, required } if !path.trim().is_empty() => Some(
                AuthenticationRequirementHolder::new(path, *required, source),
            ),
            RequirementEntry::Explicit { .. } => None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthenticatorConfig {
    /// The name of the cookie remembering the impersonated user
    #[serde(alias = "auth.sudo.cookie")]
    pub sudo_cookie: String,
    /// The name of the request parameter selecting the impersonated user
    #[serde(alias = "auth.sudo.parameter")]
    pub sudo_parameter: String,
    /// Whether requests not covered by any requirement may be served anonymously
    #[serde(alias = "auth.annonymous")]
    pub anonymous_allowed: bool,
    #[serde(alias = "sling.auth.requirements")]
    pub requirements: Vec<RequirementEntry>,
    /// Whether to send `Cache-Control: no-cache="Set-Cookie"` when the impersonation cookie
    /// changes
    pub cache_control: bool,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        AuthenticatorConfig {
            sudo_cookie: DEFAULT_COOKIE.to_owned(),
            sudo_parameter: DEFAULT_PARAMETER.to_owned(),
            anonymous_allowed: true,
            requirements: Vec::new(),
            cache_control: false,
        }
    }
}

impl AuthenticatorConfig {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&raw)
    }

    /// The impersonation settings. Blank cookie or parameter names fall back to the defaults
    pub fn sudo_settings(&self) -> SudoSettings {
        SudoSettings {
            cookie_name: non_blank_or(&self.sudo_cookie, DEFAULT_COOKIE),
            parameter_name: non_blank_or(&self.sudo_parameter, DEFAULT_PARAMETER),
            cache_control: self.cache_control,
        }
    }
}

fn non_blank_or(value: &str, default: &str) -> String {
    match value.trim() {
        "" => default.to_owned(),
        v => v.to_owned(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthenticatorConfig::from_toml("").unwrap();
        assert_eq!(AuthenticatorConfig::default(), config);
        assert!(config.anonymous_allowed);
        let sudo = config.sudo_settings();
        assert_eq!(DEFAULT_COOKIE, sudo.cookie_name);
        assert_eq!(DEFAULT_PARAMETER, sudo.parameter_name);
        assert!(!sudo.cache_control);
    }

    #[test]
    fn test_legacy_names() {
        let config = AuthenticatorConfig::from_toml(
            r#"
            "auth.sudo.cookie" = "my.sudo"
            "auth.sudo.parameter" = "  "
            "auth.annonymous" = false
            "sling.auth.requirements" = ["-/public"]
            "#,
        )
        .unwrap();
        assert!(!config.anonymous_allowed);
        let sudo = config.sudo_settings();
        assert_eq!("my.sudo", sudo.cookie_name);
        assert_eq!(DEFAULT_PARAMETER, sudo.parameter_name, "blank falls back");
        assert_eq!(
            vec![RequirementEntry::Pattern("-/public".to_owned())],
            config.requirements
        );
    }

    #[test]
    fn test_requirement_entries() {
        let config = AuthenticatorConfig::from_toml(
            r#"
            requirements = [
                "+/content",
                { path = "/apps" },
                { path = "/public", required = false },
                { path = " " },
                "",
            ]
            "#,
        )
        .unwrap();
        let holders: Vec<String> = config
            .requirements
            .iter()
            .filter_map(|r| r.to_holder("test"))
            .map(|h| h.to_string())
            .collect();
        assert_eq!(vec!["+/content", "+/apps", "-/public"], holders);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            AuthenticatorConfig::from_toml("anonymous_allowed = \"maybe\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[tokio::test]
    async fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authenticator.toml");
        tokio::fs::write(&path, "cache_control = true\n")
            .await
            .unwrap();
        let config = AuthenticatorConfig::load(&path).await.unwrap();
        assert!(config.cache_control);

        assert!(matches!(
            AuthenticatorConfig::load(dir.path().join("missing.toml")).await,
            Err(ConfigError::Io(_))
        ));
    }
}
