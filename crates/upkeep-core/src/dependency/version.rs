//! Lenient semantic-version handling for package registries.

use semver::Version;

use crate::domain::VersionDelta;

#[derive(Debug, thiserror::Error)]
#[error("unparseable version {input:?}: {reason}")]
pub struct VersionError {
    pub input: String,
    pub reason: String,
}

/// Parse a registry version string.
///
/// Accepts a leading `v`, pads `2` / `2.1` with zeros and drops numeric
/// components past the third (`1.2.3.4` compares as `1.2.3`). Pre-release and
/// build suffixes follow semver rules.
pub fn parse_lenient(input: &str) -> Result<Version, VersionError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split_at = body.find(['-', '+']).unwrap_or(body.len());
    let (core, suffix) = body.split_at(split_at);

    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(VersionError {
            input: input.to_string(),
            reason: "empty version component".to_string(),
        });
    }
    parts.truncate(3);
    while parts.len() < 3 {
        parts.push("0");
    }

    let normalized = format!("{}{}", parts.join("."), suffix);
    Version::parse(&normalized).map_err(|e| VersionError {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// Classify the change from `current` to `available`.
///
/// Returns `None` when `available` is not newer.
pub fn classify_delta(current: &Version, available: &Version) -> Option<VersionDelta> {
    if available <= current {
        return None;
    }
    let delta = if available.major != current.major {
        VersionDelta::Major
    } else if available.minor != current.minor {
        VersionDelta::Minor
    } else {
        VersionDelta::Patch
    };
    Some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse_lenient(s).unwrap()
    }

    #[test]
    fn test_parse_pads_and_strips() {
        assert_eq!(v("2"), Version::new(2, 0, 0));
        assert_eq!(v("v2.1"), Version::new(2, 1, 0));
        assert_eq!(v(" 1.2.3 "), Version::new(1, 2, 3));
        assert_eq!(v("1.2.3.4"), Version::new(1, 2, 3));
        assert_eq!(v("1.0.0-rc.1").pre.as_str(), "rc.1");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_lenient("").is_err());
        assert!(parse_lenient("latest").is_err());
        assert!(parse_lenient("1..2").is_err());
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify_delta(&v("1.2.3"), &v("1.2.4")), Some(VersionDelta::Patch));
        assert_eq!(classify_delta(&v("1.2.3"), &v("1.3.0")), Some(VersionDelta::Minor));
        assert_eq!(classify_delta(&v("1.2.3"), &v("2.0.0")), Some(VersionDelta::Major));
        assert_eq!(classify_delta(&v("1.2.3"), &v("1.2.3")), None);
        assert_eq!(classify_delta(&v("1.2.3"), &v("1.2.2")), None);
        assert_eq!(
            classify_delta(&v("1.2.3-rc.1"), &v("1.2.3")),
            Some(VersionDelta::Patch)
        );
    }
}
