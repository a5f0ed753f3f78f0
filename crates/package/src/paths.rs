use std::env;
use std::path::{Path, PathBuf};

/// Conventional file name of the default signing key.
pub const PRIVATE_KEY_FILE: &str = "gem-private_key.pem";
/// Conventional file name of the default signing certificate.
pub const PUBLIC_CERT_FILE: &str = "gem-public_cert.pem";

/// Filesystem locations of signing material and trust roots.
///
/// Everything that touches these paths takes an explicit `Locations`, so no
/// component reads process-wide state behind the caller's back; `resolve`
/// is the one place the environment is consulted.
#[derive(Debug, Clone)]
pub struct Locations {
    pub private_key: PathBuf,
    pub public_cert: PathBuf,
    pub trust_dir: PathBuf,
}

impl Locations {
    /// Environment overrides first (`GEM_PRIVATE_KEY`, `GEM_PUBLIC_CERT`,
    /// `GEM_TRUST_DIR`), conventional home paths otherwise.
    pub fn resolve() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            private_key: env_path("GEM_PRIVATE_KEY")
                .unwrap_or_else(|| home.join(PRIVATE_KEY_FILE)),
            public_cert: env_path("GEM_PUBLIC_CERT")
                .unwrap_or_else(|| home.join(PUBLIC_CERT_FILE)),
            trust_dir: env_path("GEM_TRUST_DIR")
                .unwrap_or_else(|| home.join(".gem").join("trust")),
        }
    }

    /// All three locations under one directory. Used by tests and sandboxed
    /// callers.
    pub fn under(dir: &Path) -> Self {
        Self {
            private_key: dir.join(PRIVATE_KEY_FILE),
            public_cert: dir.join(PUBLIC_CERT_FILE),
            trust_dir: dir.join("trust"),
        }
    }
}

impl Default for Locations {
    fn default() -> Self {
        Self::resolve()
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
