//! Server version probing.

use std::fmt;

use super::ActivityError;

/// PostgreSQL server version as `(major, minor)`.
///
/// Parsed once per connection from `SHOW server_version`. Compared as
/// integers, so `(10, 0) > (9, 6)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses the output of `SHOW server_version`.
    ///
    /// Only the first whitespace-separated token is considered, and only its
    /// first two dot-separated components:
    /// - `"12.4 (Debian 12.4-1.pgdg100+1)"` → `12.4`
    /// - `"9.6.3"` → `9.6`
    pub fn parse(raw: &str) -> Result<Self, ActivityError> {
        let err = || ActivityError::VersionParse(raw.to_string());

        let token = raw.split_whitespace().next().ok_or_else(err)?;
        let mut parts = token.splitn(3, '.');
        let major = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(err)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(err)?;

        Ok(Self { major, minor })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_distribution_suffix() {
        let v = ServerVersion::parse("12.4 (Debian 12.4-1.pgdg100+1)").unwrap();
        assert_eq!(v, ServerVersion::new(12, 4));
    }

    #[test]
    fn parses_three_component_version() {
        assert_eq!(ServerVersion::parse("9.6.3").unwrap(), ServerVersion::new(9, 6));
        assert_eq!(ServerVersion::parse("9.1.24").unwrap(), ServerVersion::new(9, 1));
    }

    #[test]
    fn rejects_non_numeric_leading_token() {
        assert!(matches!(
            ServerVersion::parse("EnterpriseDB 9.6"),
            Err(ActivityError::VersionParse(_))
        ));
        assert!(matches!(
            ServerVersion::parse(""),
            Err(ActivityError::VersionParse(_))
        ));
    }

    #[test]
    fn rejects_single_component() {
        assert!(matches!(
            ServerVersion::parse("16devel"),
            Err(ActivityError::VersionParse(_))
        ));
        assert!(matches!(
            ServerVersion::parse("13"),
            Err(ActivityError::VersionParse(_))
        ));
    }

    #[test]
    fn compares_numerically() {
        assert!(ServerVersion::new(10, 0) > ServerVersion::new(9, 6));
        assert!(ServerVersion::new(9, 10) > ServerVersion::new(9, 2));
        assert_eq!(ServerVersion::new(14, 2).to_string(), "14.2");
    }
}
