//! Trust tiers declared by agent manifests.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Manifest-declared tier that raises or lowers approval requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
    /// Every consequential action requires explicit approval.
    Supervised,
    /// Routine actions run unattended; flagged tools still require approval.
    SemiAutonomous,
    /// Fully autonomous under continuous health and audit monitoring.
    MonitoredAutonomous,
}

impl TrustLevel {
    /// Returns `true` when the tier requires an explicit approval object on
    /// every dispatched task.
    #[must_use]
    pub const fn requires_approval(self) -> bool {
        matches!(self, Self::Supervised)
    }

    /// Returns the canonical wire label for the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Supervised => "supervised",
            Self::SemiAutonomous => "semi-autonomous",
            Self::MonitoredAutonomous => "monitored-autonomous",
        }
    }
}

impl Default for TrustLevel {
    fn default() -> Self {
        Self::Supervised
    }
}

impl Display for TrustLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervised_requires_approval() {
        assert!(TrustLevel::Supervised.requires_approval());
        assert!(!TrustLevel::SemiAutonomous.requires_approval());
        assert!(!TrustLevel::MonitoredAutonomous.requires_approval());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&TrustLevel::MonitoredAutonomous).unwrap();
        assert_eq!(json, "\"monitored-autonomous\"");
    }
}
