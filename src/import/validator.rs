use semver::Version;
use serde_json::Value;
use thiserror::Error;

use super::bundle::ImportBundle;
use super::MIN_SUPPORTED_EXPORT_VERSION;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("wrong importer structure: `meta` is missing")]
    MissingMetadata,
    #[error("wrong importer structure: `meta.version` is missing")]
    MissingVersion,
    #[error("unsupported export version {version}: {reason}")]
    UnsupportedVersion { version: String, reason: String },
}

/// Which export versions may be imported. Exports older than `minimum`
/// belong to a legacy epoch and are refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPolicy {
    pub minimum: Version,
}

impl VersionPolicy {
    pub fn with_minimum(minimum: Version) -> Self {
        Self { minimum }
    }

    pub fn check(&self, raw: &str) -> Result<Version, EnvelopeError> {
        let candidate = raw.trim();
        let candidate = candidate
            .strip_prefix(['v', '='])
            .unwrap_or(candidate);
        let version = Version::parse(candidate).map_err(|err| EnvelopeError::UnsupportedVersion {
            version: raw.to_string(),
            reason: format!("not a semantic version ({err})"),
        })?;
        if version < self.minimum {
            return Err(EnvelopeError::UnsupportedVersion {
                version: raw.to_string(),
                reason: format!("exports older than {} are not supported", self.minimum),
            });
        }
        Ok(version)
    }
}

impl Default for VersionPolicy {
    fn default() -> Self {
        Self {
            minimum: Version::parse(MIN_SUPPORTED_EXPORT_VERSION)
                .unwrap_or_else(|_| Version::new(1, 0, 0)),
        }
    }
}

/// Checks bundle shape and version. Pure; runs before any transaction opens.
pub fn validate_envelope<'b>(
    bundle: &'b ImportBundle,
    policy: &VersionPolicy,
) -> Result<&'b ImportBundle, EnvelopeError> {
    let meta = match &bundle.meta {
        Some(Value::Object(meta)) => meta,
        _ => return Err(EnvelopeError::MissingMetadata),
    };
    let version = match meta.get("version") {
        None | Some(Value::Null) => return Err(EnvelopeError::MissingVersion),
        Some(Value::String(version)) => version,
        Some(other) => {
            return Err(EnvelopeError::UnsupportedVersion {
                version: other.to_string(),
                reason: "version must be a string".to_string(),
            })
        }
    };
    let parsed = policy.check(version)?;
    tracing::debug!(target: "publish_import", event = "envelope_valid", version = %parsed);
    Ok(bundle)
}
