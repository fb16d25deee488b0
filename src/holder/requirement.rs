use std::fmt;

use super::{HolderInfo, HolderPath, PathHolder};

/// States whether requests below a path prefix require authentication
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationRequirementHolder {
    path: HolderPath,
    requires_authentication: bool,
    source: String,
}

impl AuthenticationRequirementHolder {
    pub fn new(path: &str, requires_authentication: bool, source: &str) -> Self {
        AuthenticationRequirementHolder {
            path: HolderPath::parse(path),
            requires_authentication,
            source: source.to_owned(),
        }
    }

    /// Parses a configured requirement pattern. A leading `+` marks the path as requiring
    /// authentication, a leading `-` as not requiring it. Paths without a marker require
    /// authentication. Returns `None` for blank patterns
    pub fn from_config(pattern: &str, source: &str) -> Option<Self> {
        let pattern = pattern.trim();
        let (path, required) = if let Some(p) = pattern.strip_prefix('+') {
            (p, true)
        } else if let Some(p) = pattern.strip_prefix('-') {
            (p, false)
        } else {
            (pattern, true)
        };
        if path.trim().is_empty() {
            return None;
        }
        Some(Self::new(path, required, source))
    }

    pub fn requires_authentication(&self) -> bool {
        self.requires_authentication
    }

    /// Where this requirement came from, such as the authenticator configuration or a registered
    /// service
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn info(&self) -> HolderInfo {
        HolderInfo {
            path: self.path.full_path().to_owned(),
            description: format!(
                "{} ({})",
                if self.requires_authentication {
                    "authentication required"
                } else {
                    "anonymous allowed"
                },
                self.source
            ),
        }
    }
}

impl PathHolder for AuthenticationRequirementHolder {
    fn holder_path(&self) -> &HolderPath {
        &self.path
    }
}

impl fmt::Display for AuthenticationRequirementHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            if self.requires_authentication { '+' } else { '-' },
            self.path
        )
    }
}
