use std::fs;
use std::path::{Path, PathBuf};

use gempack_x509::{issue, Cert, CertChain, PrivateKey};
use time::{Duration, OffsetDateTime};

use crate::digest::DigestAlgorithm;
use crate::error::{Error, PolicyError};
use crate::paths::Locations;
use crate::trust::TrustStore;

/// Lifetime of the replacement certificate written by expiry renewal.
pub const RENEWED_CERT_VALIDITY: Duration = Duration::days(365);

/// Chain-closure walks give up after this many trust-store hops, so an
/// issuer cycle in the store cannot loop forever.
const MAX_CHAIN_DEPTH: usize = 16;

/// Where a signing key comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    Key(PrivateKey),
    Path(PathBuf),
    Pem(Vec<u8>),
}

impl KeySource {
    fn resolve(self) -> Result<PrivateKey, Error> {
        match self {
            KeySource::Key(key) => Ok(key),
            KeySource::Path(path) => PrivateKey::from_pem_file(&path).map_err(Error::Crypto),
            KeySource::Pem(bytes) => PrivateKey::from_pem(&bytes).map_err(Error::Crypto),
        }
    }
}

/// Where a chain certificate comes from.
#[derive(Debug, Clone)]
pub enum CertSource {
    Parsed(Cert),
    Path(PathBuf),
    Pem(Vec<u8>),
}

impl CertSource {
    /// A string argument names a file when such a file exists, and is PEM
    /// text otherwise.
    pub fn from_str_like(value: &str) -> Self {
        let path = PathBuf::from(value);
        if path.is_file() {
            CertSource::Path(path)
        } else {
            CertSource::Pem(value.as_bytes().to_vec())
        }
    }

    fn resolve(self) -> Result<Cert, Error> {
        match self {
            CertSource::Parsed(cert) => Ok(cert),
            CertSource::Path(path) => {
                let bytes = fs::read(&path)?;
                Cert::from_pem(&bytes).map_err(Error::Crypto)
            }
            CertSource::Pem(bytes) => Cert::from_pem(&bytes).map_err(Error::Crypto),
        }
    }
}

/// Holds the private key and certificate chain that sign archive members,
/// and renews a lone expired self-signed certificate in place.
pub struct Signer {
    chain: CertChain,
    key: Option<PrivateKey>,
    digest_algorithm: DigestAlgorithm,
    locations: Locations,
}

impl Signer {
    /// Build a signer, probing the conventional key and certificate
    /// locations for whatever was not passed, and closing the chain against
    /// the trust store.
    pub fn new(key: Option<KeySource>, chain: Vec<CertSource>) -> Result<Self, Error> {
        Self::with_locations(key, chain, Locations::resolve())
    }

    pub fn with_locations(
        key: Option<KeySource>,
        chain: Vec<CertSource>,
        locations: Locations,
    ) -> Result<Self, Error> {
        Self::build(key, chain, locations, true)
    }

    /// A signer with no key: nothing gets signed, but the default public
    /// certificate still rides along for display.
    pub fn unsigned(locations: Locations) -> Result<Self, Error> {
        Self::build(None, Vec::new(), locations, false)
    }

    fn build(
        key: Option<KeySource>,
        chain: Vec<CertSource>,
        locations: Locations,
        probe_key: bool,
    ) -> Result<Self, Error> {
        let key = match key {
            Some(source) => Some(source.resolve()?),
            None if probe_key && locations.private_key.is_file() => {
                Some(PrivateKey::from_pem_file(&locations.private_key).map_err(Error::Crypto)?)
            }
            None => None,
        };

        let mut certs = Vec::new();
        if chain.is_empty() {
            if locations.public_cert.is_file() {
                let bytes = fs::read(&locations.public_cert)?;
                certs.push(Cert::from_pem(&bytes).map_err(Error::Crypto)?);
            }
        } else {
            for source in chain {
                certs.push(source.resolve()?);
            }
        }

        let mut chain = CertChain::from_certs(certs);
        let trust = TrustStore::new(locations.trust_dir.clone());
        close_chain(&mut chain, &trust)?;

        Ok(Self {
            chain,
            key,
            digest_algorithm: DigestAlgorithm::DEFAULT,
            locations,
        })
    }

    pub fn chain(&self) -> &CertChain {
        &self.chain
    }

    pub fn key(&self) -> Option<&PrivateKey> {
        self.key.as_ref()
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    /// The chain as PEM blobs, root first, for embedding in metadata.
    pub fn cert_chain_pem(&self) -> Vec<String> {
        self.chain.pem_blocks()
    }

    /// Sign `data`, renewing a lone expired self-signed certificate first.
    /// Returns `None` when the signer holds no key.
    pub fn sign(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        if self.key.is_none() {
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        if self.chain.len() == 1 && self.chain.certs()[0].not_after() < now.unix_timestamp() {
            self.re_sign_key(now)?;
        }

        let Some(key) = &self.key else {
            return Ok(None);
        };
        // the key/chain invariant holds before every signing operation; a
        // keyed signer with no certificate at all fails the same way
        let leaf = self.chain.leaf().ok_or(PolicyError::KeyChainMismatch)?;
        if !key.matches_spki(leaf.spki_der()).map_err(Error::Crypto)? {
            return Err(PolicyError::KeyChainMismatch.into());
        }

        let signature = key
            .sign(self.digest_algorithm.sig_algo(), data)
            .map_err(Error::Crypto)?;
        Ok(Some(signature))
    }

    /// Replace a lone expired self-signed certificate with a fresh one.
    ///
    /// Only fires when the on-disk key and certificate at the conventional
    /// locations still match the in-memory ones and no archival copy for
    /// this expiry exists; otherwise the expired certificate stays for
    /// verification to report.
    fn re_sign_key(&mut self, now: OffsetDateTime) -> Result<(), Error> {
        let Some(key) = &self.key else {
            return Ok(());
        };
        let old_cert = self.chain.certs()[0].clone();

        let disk_key_matches = match fs::read(&self.locations.private_key) {
            Ok(bytes) => PrivateKey::from_pem(&bytes)
                .map(|disk| disk == *key)
                .unwrap_or(false),
            Err(_) => false,
        };
        let disk_cert_matches = match fs::read(&self.locations.public_cert) {
            Ok(bytes) => Cert::from_pem(&bytes)
                .map(|disk| disk.der() == old_cert.der())
                .unwrap_or(false),
            Err(_) => false,
        };
        if !disk_key_matches || !disk_cert_matches {
            log::debug!(
                "expired certificate left in place: on-disk key or certificate differs from the loaded one"
            );
            return Ok(());
        }

        let expiry = format_expiry(old_cert.not_after())?;
        let archive_path = archived_cert_path(&self.locations.public_cert, &expiry);
        if archive_path.exists() {
            log::debug!(
                "expired certificate left in place: archival copy already present at {}",
                archive_path.display()
            );
            return Ok(());
        }

        fs::rename(&self.locations.public_cert, &archive_path)?;

        let subject = old_cert.subject_components().map_err(Error::Crypto)?;
        let key_pem = key.to_pkcs8_pem().map_err(Error::Crypto)?;
        let pem = issue::self_signed(&key_pem, &subject, now, now + RENEWED_CERT_VALIDITY)
            .map_err(Error::Crypto)?;
        fs::write(&self.locations.public_cert, &pem)?;

        let new_cert = Cert::from_pem(pem.as_bytes()).map_err(Error::Crypto)?;
        log::info!(
            "renewed expired signing certificate {}; previous certificate archived at {}",
            new_cert.subject(),
            archive_path.display()
        );
        self.chain = CertChain::from_certs(vec![new_cert]);
        Ok(())
    }
}

/// Prepend trusted issuers until the chain roots at a self-signed
/// certificate. A missing issuer leaves the chain open for the policy to
/// judge.
fn close_chain(chain: &mut CertChain, trust: &TrustStore) -> Result<(), Error> {
    for _ in 0..MAX_CHAIN_DEPTH {
        let Some(root) = chain.root() else {
            return Ok(());
        };
        if root.is_self_signed() {
            return Ok(());
        }
        match trust.issuer_of(root)? {
            Some(issuer) => {
                log::debug!(
                    "closing certificate chain with trusted issuer {}",
                    issuer.subject()
                );
                chain.prepend(issuer);
            }
            None => return Ok(()),
        }
    }
    Ok(())
}

fn format_expiry(not_after: i64) -> Result<String, Error> {
    let t = OffsetDateTime::from_unix_timestamp(not_after)
        .map_err(|err| Error::Crypto(anyhow::anyhow!("certificate expiry out of range: {err}")))?;
    Ok(format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}",
        t.year(),
        t.month() as u8,
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    ))
}

fn archived_cert_path(cert_path: &Path, expiry: &str) -> PathBuf {
    let name = cert_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    cert_path.with_file_name(format!("{name}.expired.{expiry}"))
}
