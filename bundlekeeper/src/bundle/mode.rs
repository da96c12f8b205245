//! Update policies.

use std::fmt;
use std::str::FromStr;

use super::error::BundleError;

/// How aggressively a stale bundle is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateMode {
    /// Never serve a stale master: block until the requested version is ready.
    #[default]
    Mandatory,
    /// Serve an existing master right away and fetch the update in the
    /// background. Blocks only when there is no master at all.
    Optional,
    /// Like `Optional`, but a finished background download is only picked up
    /// by a later reconciliation.
    Postponed,
}

impl UpdateMode {
    /// All modes, in declaration order.
    pub const ALL: [UpdateMode; 3] = [Self::Mandatory, Self::Optional, Self::Postponed];

    /// Lowercase name used in configuration and events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mandatory => "mandatory",
            Self::Optional => "optional",
            Self::Postponed => "postponed",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UpdateMode {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mandatory" => Ok(Self::Mandatory),
            "optional" => Ok(Self::Optional),
            "postponed" => Ok(Self::Postponed),
            other => Err(BundleError::InvalidConfig(format!(
                "unknown update mode '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trips_through_name() {
        for mode in UpdateMode::ALL {
            assert_eq!(mode.name().parse::<UpdateMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_mode_parse_is_lenient_about_case() {
        assert_eq!("Optional".parse::<UpdateMode>().unwrap(), UpdateMode::Optional);
        assert_eq!(" POSTPONED".parse::<UpdateMode>().unwrap(), UpdateMode::Postponed);
    }

    #[test]
    fn test_mode_parse_rejects_unknown() {
        let err = "eventually".parse::<UpdateMode>().unwrap_err();
        assert!(err.to_string().contains("eventually"));
    }

    #[test]
    fn test_default_mode() {
        assert_eq!(UpdateMode::default(), UpdateMode::Mandatory);
    }
}
