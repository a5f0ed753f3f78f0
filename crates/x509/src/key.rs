use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::SigAlgo;

/// An RSA signing key. Detached signatures use deterministic PKCS#1 v1.5.
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(rsa)")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl PrivateKey {
    pub fn from_rsa(inner: RsaPrivateKey) -> Self {
        Self { inner }
    }

    /// Accepts both PKCS#1 (`BEGIN RSA PRIVATE KEY`) and PKCS#8
    /// (`BEGIN PRIVATE KEY`) encodings.
    pub fn from_pem(bytes: &[u8]) -> anyhow::Result<Self> {
        let text = std::str::from_utf8(bytes).context("private key PEM is not UTF-8")?;
        let inner = if text.contains("BEGIN RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_pem(text).context("parse PKCS#1 private key failed")?
        } else {
            RsaPrivateKey::from_pkcs8_pem(text).context("parse PKCS#8 private key failed")?
        };
        Ok(Self { inner })
    }

    pub fn from_pem_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("cannot read private key at {}", path.display()))?;
        Self::from_pem(&bytes)
    }

    pub fn to_pkcs8_pem(&self) -> anyhow::Result<String> {
        let pem = self
            .inner
            .to_pkcs8_pem(LineEnding::LF)
            .context("serialize private key failed")?;
        Ok(pem.to_string())
    }

    /// SubjectPublicKeyInfo DER of the public half.
    pub fn public_key_der(&self) -> anyhow::Result<Vec<u8>> {
        let der = self
            .inner
            .to_public_key()
            .to_public_key_der()
            .context("serialize public key failed")?;
        Ok(der.as_bytes().to_vec())
    }

    /// Whether this key's public half matches the given SubjectPublicKeyInfo.
    pub fn matches_spki(&self, spki: &[u8]) -> anyhow::Result<bool> {
        Ok(self.public_key_der()? == spki)
    }

    /// Signature length in bytes (the RSA modulus size).
    pub fn signature_len(&self) -> usize {
        self.inner.size()
    }

    /// Sign `message`: hash with the algorithm's digest, then RSA PKCS#1
    /// v1.5 over the hash.
    pub fn sign(&self, sig_algo: SigAlgo, message: &[u8]) -> anyhow::Result<Vec<u8>> {
        let (padding, hashed) = match sig_algo {
            SigAlgo::RsaSha256 => (
                Pkcs1v15Sign::new::<Sha256>(),
                Sha256::digest(message).to_vec(),
            ),
            SigAlgo::RsaSha384 => (
                Pkcs1v15Sign::new::<Sha384>(),
                Sha384::digest(message).to_vec(),
            ),
            SigAlgo::RsaSha512 => (
                Pkcs1v15Sign::new::<Sha512>(),
                Sha512::digest(message).to_vec(),
            ),
            other => {
                return Err(anyhow!(
                    "cannot sign with {:?}: signing keys are RSA",
                    other
                ))
            }
        };
        self.inner
            .sign(padding, &hashed)
            .map_err(|err| anyhow!("RSA signing failed: {}", err))
    }
}
