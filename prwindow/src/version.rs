use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// `MAJOR.MINOR.PATCH` release version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("not a MAJOR.MINOR.PATCH version: {0:?}")]
pub struct ParseVersionError(String);

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    pub fn next_patch(self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }

    pub fn next_minor(self) -> Self {
        Self::new(self.major, self.minor + 1, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let mut parts = body.split('.');
        let mut component = || -> Result<u64, ParseVersionError> {
            let part = parts.next().ok_or_else(err)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            part.parse().map_err(|_| err())
        };
        let version = Version::new(component()?, component()?, component()?);

        if parts.next().is_some() {
            return Err(err());
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: Version = "1.2.3".parse().unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
        assert_eq!("v2.0.10".parse::<Version>().unwrap(), Version::new(2, 0, 10));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "1", "1.2", "1.2.3.4", "1.x.3", "main", "1.-2.3"] {
            assert!(bad.parse::<Version>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_bumps() {
        let v = Version::new(1, 0, 2);
        assert_eq!(v.next_patch(), Version::new(1, 0, 3));
        assert_eq!(v.next_minor(), Version::new(1, 1, 0));
        assert!(Version::new(1, 0, 10) > Version::new(1, 0, 9));
        assert!(Version::new(1, 1, 0) > Version::new(1, 0, 99));
    }
}
