use std::fs;
use std::path::{Path, PathBuf};

use gempack_x509::Cert;

use crate::digest::{Digest, DigestAlgorithm};
use crate::error::Error;

/// An on-disk set of trusted root certificates.
///
/// Lookup is keyed by a digest of the canonical subject name; whether a
/// presented root actually matches the stored one is decided by comparing
/// public-key digests, so a colliding subject cannot borrow trust.
#[derive(Debug, Clone)]
pub struct TrustStore {
    dir: PathBuf,
}

impl TrustStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic storage path for a certificate, derived from its
    /// subject.
    pub fn cert_path(&self, cert: &Cert) -> PathBuf {
        let digest = DigestAlgorithm::Sha256.digest(cert.subject().as_bytes());
        self.dir.join(format!("cert-{}.pem", digest.hex()))
    }

    /// Digest over the public key: the value compared when deciding whether
    /// a stored root and a presented root are the same authority.
    pub fn key_digest(cert: &Cert) -> Digest {
        DigestAlgorithm::Sha256.digest(cert.spki_der())
    }

    /// Find a stored certificate whose subject is `cert`'s issuer. A missing
    /// store directory is an empty store.
    pub fn issuer_of(&self, cert: &Cert) -> Result<Option<Cert>, Error> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("pem") {
                continue;
            }
            let Ok(bytes) = fs::read(&path) else { continue };
            let Ok(candidate) = Cert::from_pem(&bytes) else {
                log::warn!("skipping unparseable trust certificate at {}", path.display());
                continue;
            };
            if candidate.subject() == cert.issuer() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Load the stored certificate at `cert`'s storage path, if present.
    pub fn stored(&self, cert: &Cert) -> Result<Option<Cert>, Error> {
        let path = self.cert_path(cert);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(Cert::from_pem(&bytes).map_err(Error::Crypto)?))
    }

    pub fn add(&self, cert: &Cert) -> Result<PathBuf, Error> {
        fs::create_dir_all(&self.dir)?;
        let path = self.cert_path(cert);
        fs::write(&path, cert.to_pem())?;
        Ok(path)
    }

    pub fn remove(&self, cert: &Cert) -> Result<(), Error> {
        let path = self.cert_path(cert);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
