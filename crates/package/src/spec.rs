use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::signer::KeySource;

/// The package metadata document, the body of the `metadata.gz` member.
///
/// The format engine only serializes this record and reads it back;
/// descriptive fields are kept to the minimum the archive needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Payload files, relative to the build root.
    #[serde(default)]
    pub files: Vec<String>,
    /// PEM certificate chain, root first, recorded so verifiers can
    /// reconstruct the signer identity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cert_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packager_version: Option<String>,
    /// Where the signing key comes from. Never serialized.
    #[serde(skip)]
    pub signing_key: Option<KeySource>,
}

impl PackageSpec {
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::format("missing name in package metadata", None));
        }
        if self.version.is_empty() {
            return Err(Error::format("missing version in package metadata", None));
        }
        for file in &self.files {
            if Path::new(file).is_absolute() {
                return Err(Error::format(
                    format!("package files must be relative paths: {file}"),
                    None,
                ));
            }
        }
        Ok(())
    }

    /// Record the packager version that produced the archive.
    pub fn mark_version(&mut self) {
        self.packager_version = Some(env!("CARGO_PKG_VERSION").to_string());
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self)
            .map_err(|err| Error::format(format!("cannot serialize metadata: {err}"), None))
    }

    pub fn from_yaml(bytes: &[u8]) -> Result<Self, Error> {
        serde_yaml::from_slice(bytes)
            .map_err(|err| Error::format(format!("corrupt package metadata: {err}"), None))
    }
}
