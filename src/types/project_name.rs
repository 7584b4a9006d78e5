// ABOUTME: Validated Compose project names.
// ABOUTME: Compose allows lowercase letters, digits, dashes and underscores.

use serde::{Deserialize, Deserializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectNameError {
    #[error("project name cannot be empty")]
    Empty,

    #[error("project name must start with a lowercase letter or digit")]
    BadStart,

    #[error("project name must be lowercase")]
    NotLowercase,

    #[error("invalid character in project name: '{0}'")]
    InvalidChar(char),
}

/// Name passed to `docker compose -p`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectName(String);

impl ProjectName {
    pub fn new(value: &str) -> Result<Self, ProjectNameError> {
        let first = value.chars().next().ok_or(ProjectNameError::Empty)?;
        if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
            return Err(if first.is_ascii_uppercase() {
                ProjectNameError::NotLowercase
            } else {
                ProjectNameError::BadStart
            });
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(ProjectNameError::NotLowercase);
            }
            if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
                return Err(ProjectNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ProjectName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ProjectName::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_underscores_and_long_names() {
        assert!(ProjectName::new("shop_frontend").is_ok());
        assert!(ProjectName::new("0day").is_ok());
        assert!(ProjectName::new(&"a".repeat(80)).is_ok());
    }

    #[test]
    fn rejects_names_compose_would_refuse() {
        assert_eq!(ProjectName::new(""), Err(ProjectNameError::Empty));
        assert_eq!(ProjectName::new("_shop"), Err(ProjectNameError::BadStart));
        assert_eq!(ProjectName::new("-shop"), Err(ProjectNameError::BadStart));
        assert_eq!(ProjectName::new("Shop"), Err(ProjectNameError::NotLowercase));
        assert_eq!(ProjectName::new("shop.web"), Err(ProjectNameError::InvalidChar('.')));
    }
}
