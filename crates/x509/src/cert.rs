use anyhow::{anyhow, Context};
use x509_parser::prelude::*;

use crate::KeyAlgo;
use crate::PubKey;
use crate::SigAlgo;
use crate::verify_signature;

/// An owned X.509 certificate.
///
/// x509-parser certificates borrow the buffer they were parsed from, which
/// makes them awkward to keep in long-lived chains; the fields needed for
/// chain walking and policy checks are extracted up front instead.
#[derive(Debug, Clone)]
pub struct Cert {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    not_before: i64,
    not_after: i64,
    spki: Vec<u8>,
    tbs: Vec<u8>,
    signature: Vec<u8>,
    sig_algo: SigAlgo,
    key_algo: KeyAlgo,
}

// Chain walking compares certificates by canonical subject name.
impl PartialEq for Cert {
    fn eq(&self, other: &Self) -> bool {
        self.subject == other.subject
    }
}

impl Cert {
    pub fn from_der(bytes: &[u8]) -> anyhow::Result<Self> {
        let (remain, raw) = X509Certificate::from_der(bytes)
            .map_err(|err| anyhow!("parse cert failed: {:?}", err))?;
        if !remain.is_empty() {
            return Err(anyhow!("parse cert did not consume all bytes"));
        }
        let key_algo = KeyAlgo::from_algo(&raw.public_key().algorithm)?;
        let sig_algo = SigAlgo::from_oid(raw.signature_algorithm.oid())?;
        Ok(Self {
            subject: raw.subject().to_string(),
            issuer: raw.issuer().to_string(),
            not_before: raw.validity().not_before.timestamp(),
            not_after: raw.validity().not_after.timestamp(),
            spki: raw.public_key().raw.to_vec(),
            tbs: raw.tbs_certificate.as_ref().to_vec(),
            signature: raw.signature_value.as_ref().to_vec(),
            sig_algo,
            key_algo,
            der: bytes.to_vec(),
        })
    }

    /// Parse the first CERTIFICATE block of a PEM document.
    pub fn from_pem(bytes: &[u8]) -> anyhow::Result<Self> {
        let block = ::pem::parse(bytes).context("invalid certificate PEM")?;
        if block.tag() != "CERTIFICATE" {
            return Err(anyhow!("expected a CERTIFICATE PEM, found {}", block.tag()));
        }
        Self::from_der(block.contents())
    }

    pub fn to_pem(&self) -> String {
        ::pem::encode(&::pem::Pem::new("CERTIFICATE", self.der.clone()))
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Canonical subject distinguished name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Canonical issuer distinguished name.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Start of the validity window, Unix seconds.
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// End of the validity window, Unix seconds.
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    pub fn is_self_signed(&self) -> bool {
        self.issuer == self.subject
    }

    /// Full SubjectPublicKeyInfo DER.
    pub fn spki_der(&self) -> &[u8] {
        &self.spki
    }

    pub fn key_algo(&self) -> KeyAlgo {
        self.key_algo
    }

    pub fn public_key(&self) -> PubKey<'_> {
        PubKey {
            algo: self.key_algo,
            spki: &self.spki,
        }
    }

    /// Check this certificate's signature against the issuer's public key.
    /// Pass the certificate's own key for a self-signed certificate.
    pub fn verify_issued_by(&self, issuer_key: &PubKey<'_>) -> anyhow::Result<bool> {
        verify_signature(issuer_key, self.sig_algo, &self.signature, &self.tbs)
    }

    /// Subject attributes as (dotted OID, value) pairs, in certificate
    /// order. Used to re-issue a certificate with the same subject.
    pub fn subject_components(&self) -> anyhow::Result<Vec<(String, String)>> {
        let (_, raw) = X509Certificate::from_der(&self.der)
            .map_err(|err| anyhow!("parse cert failed: {:?}", err))?;
        let mut components = Vec::new();
        for rdn in raw.subject().iter() {
            for attr in rdn.iter() {
                let value = attr
                    .attr_value()
                    .as_str()
                    .map_err(|err| anyhow!("non-string subject attribute: {:?}", err))?;
                components.push((attr.attr_type().to_id_string(), value.to_string()));
            }
        }
        Ok(components)
    }
}

/// An ordered certificate chain, root first, signer (leaf) last.
#[derive(Debug, Clone, Default)]
pub struct CertChain {
    certs: Vec<Cert>,
}

impl CertChain {
    pub fn new() -> Self {
        Self { certs: Vec::new() }
    }

    pub fn from_certs(certs: Vec<Cert>) -> Self {
        Self { certs }
    }

    /// Parse a sequence of PEM blobs, root first.
    pub fn parse_pem_blocks<I, B>(blocks: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut chain = Self::new();
        for block in blocks {
            chain.push(Cert::from_pem(block.as_ref())?);
        }
        Ok(chain)
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn certs(&self) -> &[Cert] {
        &self.certs
    }

    /// The signing certificate.
    pub fn leaf(&self) -> Option<&Cert> {
        self.certs.last()
    }

    pub fn root(&self) -> Option<&Cert> {
        self.certs.first()
    }

    pub fn push(&mut self, cert: Cert) {
        self.certs.push(cert);
    }

    pub fn prepend(&mut self, cert: Cert) {
        self.certs.insert(0, cert);
    }

    /// A chain is closed when it roots at a self-signed certificate.
    pub fn is_closed(&self) -> bool {
        self.root().map(Cert::is_self_signed).unwrap_or(false)
    }

    pub fn pem_blocks(&self) -> Vec<String> {
        self.certs.iter().map(Cert::to_pem).collect()
    }
}
