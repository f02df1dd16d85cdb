use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sketchfab license slug.
///
/// Standard and Editorial are sold licenses: the API refuses to set them
/// together with a price at creation time, so those models are created under
/// [`License::FreeStandard`] and patched to the real license afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum License {
    Standard,
    Editorial,
    FreeStandard,
    Other(String),
}

impl License {
    pub fn slug(&self) -> &str {
        match self {
            License::Standard => "st",
            License::Editorial => "ed",
            License::FreeStandard => "free-st",
            License::Other(slug) => slug,
        }
    }

    /// Whether this license needs a price set through a follow-up patch.
    pub fn is_priced(&self) -> bool {
        matches!(self, License::Standard | License::Editorial)
    }

    /// License submitted with the create call.
    pub fn creation_license(&self) -> License {
        if self.is_priced() {
            License::FreeStandard
        } else {
            self.clone()
        }
    }
}

impl FromStr for License {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "st" => License::Standard,
            "ed" => License::Editorial,
            "free-st" => License::FreeStandard,
            other => License::Other(other.to_string()),
        })
    }
}

impl From<String> for License {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(license) => license,
            Err(never) => match never {},
        }
    }
}

impl From<License> for String {
    fn from(value: License) -> Self {
        value.slug().to_string()
    }
}

impl fmt::Display for License {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priced_kinds() {
        assert!(License::Standard.is_priced());
        assert!(License::Editorial.is_priced());
        assert!(!License::FreeStandard.is_priced());
        assert!(!License::Other("by".into()).is_priced());
    }

    #[test]
    fn test_creation_license_uses_placeholder_for_priced() {
        assert_eq!(License::Standard.creation_license(), License::FreeStandard);
        assert_eq!(License::Editorial.creation_license(), License::FreeStandard);
        assert_eq!(
            License::Other("by-sa".into()).creation_license(),
            License::Other("by-sa".into())
        );
    }

    #[test]
    fn test_slug_roundtrip_through_serde() {
        let json = serde_json::to_string(&License::Editorial).unwrap();
        assert_eq!(json, "\"ed\"");
        let parsed: License = serde_json::from_str("\"cc0\"").unwrap();
        assert_eq!(parsed, License::Other("cc0".into()));
        assert_eq!(parsed.to_string(), "cc0");
    }
}
