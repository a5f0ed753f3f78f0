use std::collections::BTreeMap;
use std::path::PathBuf;

use gempack_x509::{verify_signature, Cert, CertChain, PrivateKey};
use time::OffsetDateTime;

use crate::digest::Digest;
use crate::error::{Error, PolicyError};
use crate::paths::Locations;
use crate::spec::PackageSpec;
use crate::trust::TrustStore;

/// A named bundle of verification toggles.
///
/// The set of policies is closed: construct one of the five presets and,
/// if needed, point it at a non-default trust directory.
#[derive(Debug, Clone)]
pub struct Policy {
    name: &'static str,
    only_signed: bool,
    only_trusted: bool,
    verify_chain: bool,
    verify_data: bool,
    verify_root: bool,
    verify_signer: bool,
    trust_dir: PathBuf,
}

impl Policy {
    /// No verification at all.
    pub fn no_security() -> Self {
        Self::preset("NoSecurity", false, false, false, false, false, false)
    }

    /// Data signatures only.
    pub fn almost_no_security() -> Self {
        Self::preset("AlmostNoSecurity", false, false, false, true, false, false)
    }

    /// Data signatures plus signer validity.
    pub fn low_security() -> Self {
        Self::preset("LowSecurity", false, false, false, true, false, true)
    }

    /// Signed packages only: data, signer, chain, and root checks.
    pub fn medium_security() -> Self {
        Self::preset("MediumSecurity", true, false, true, true, true, true)
    }

    /// Everything, including root trust.
    pub fn high_security() -> Self {
        Self::preset("HighSecurity", true, true, true, true, true, true)
    }

    fn preset(
        name: &'static str,
        only_signed: bool,
        only_trusted: bool,
        verify_chain: bool,
        verify_data: bool,
        verify_root: bool,
        verify_signer: bool,
    ) -> Self {
        Self {
            name,
            only_signed,
            only_trusted,
            verify_chain,
            verify_data,
            verify_root,
            verify_signer,
            trust_dir: Locations::resolve().trust_dir,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Override where trusted roots are looked up.
    pub fn with_trust_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trust_dir = dir.into();
        self
    }

    /// Verify a package: signer authenticity, chain integrity, root trust,
    /// and per-member data signatures, each gated by this policy's toggles.
    pub fn verify(
        &self,
        chain: &CertChain,
        key: Option<&PrivateKey>,
        digests: &BTreeMap<String, Digest>,
        signatures: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), Error> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        if self.only_signed && signatures.is_empty() {
            return Err(PolicyError::UnsignedRejected(self.name.to_string()).into());
        }

        if let Some(key) = key {
            let signer = chain.leaf().ok_or(PolicyError::MissingCertChain)?;
            check_key(signer, key)?;
        }

        if self.verify_signer {
            let signer = chain.leaf().ok_or(PolicyError::MissingCertChain)?;
            check_cert(signer, None, now)?;
        }

        if self.verify_chain {
            if chain.is_empty() {
                return Err(PolicyError::MissingCertChain.into());
            }
            for pair in chain.certs().windows(2) {
                check_cert(&pair[1], Some(&pair[0]), now)?;
            }
        }

        if self.verify_root {
            check_root(chain, now)?;
        }

        if self.only_trusted {
            self.check_trust(chain)?;
        }

        if self.verify_data {
            for (name, digest) in digests {
                let Some(signature) = signatures.get(name) else {
                    return Err(PolicyError::MissingSignature(name.clone()).into());
                };
                let signer = chain.leaf().ok_or(PolicyError::MissingCertChain)?;
                let ok = verify_signature(
                    &signer.public_key(),
                    digest.algorithm().sig_algo(),
                    signature,
                    digest.bytes(),
                )
                .map_err(Error::Crypto)?;
                if !ok {
                    return Err(PolicyError::BadSignature(name.clone()).into());
                }
            }
        }

        Ok(())
    }

    /// Verify against the chain embedded in the package metadata.
    pub fn verify_signatures(
        &self,
        spec: &PackageSpec,
        digests: &BTreeMap<String, Digest>,
        signatures: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), Error> {
        let chain = CertChain::parse_pem_blocks(spec.cert_chain.iter().map(String::as_bytes))
            .map_err(Error::Crypto)?;
        log::debug!(
            "verifying {} member signature(s) of {} under the {} policy",
            signatures.len(),
            spec.full_name(),
            self.name
        );
        self.verify(&chain, None, digests, signatures)
    }

    fn check_trust(&self, chain: &CertChain) -> Result<(), Error> {
        let root = chain.root().ok_or(PolicyError::MissingCertChain)?;
        let store = TrustStore::new(self.trust_dir.clone());
        let Some(stored) = store.stored(root)? else {
            return Err(PolicyError::UntrustedRoot {
                subject: root.subject().to_string(),
            }
            .into());
        };
        if TrustStore::key_digest(&stored) != TrustStore::key_digest(root) {
            return Err(PolicyError::TrustDigestMismatch {
                subject: root.subject().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Validity-window check, plus issuer verification when an issuer is given.
fn check_cert(cert: &Cert, issuer: Option<&Cert>, time: i64) -> Result<(), Error> {
    if cert.not_before() > time {
        return Err(PolicyError::NotYetValid {
            subject: cert.subject().to_string(),
            not_before: format_time(cert.not_before()),
        }
        .into());
    }
    if cert.not_after() < time {
        return Err(PolicyError::Expired {
            subject: cert.subject().to_string(),
            not_after: format_time(cert.not_after()),
        }
        .into());
    }
    if let Some(issuer) = issuer {
        let ok = cert
            .verify_issued_by(&issuer.public_key())
            .map_err(Error::Crypto)?;
        if !ok {
            return Err(PolicyError::IssuerMismatch {
                subject: cert.subject().to_string(),
                issuer: issuer.subject().to_string(),
            }
            .into());
        }
    }
    Ok(())
}

fn check_key(signer: &Cert, key: &PrivateKey) -> Result<(), Error> {
    if !key.matches_spki(signer.spki_der()).map_err(Error::Crypto)? {
        return Err(PolicyError::KeyChainMismatch.into());
    }
    Ok(())
}

fn check_root(chain: &CertChain, time: i64) -> Result<(), Error> {
    let root = chain.root().ok_or(PolicyError::MissingCertChain)?;
    if !root.is_self_signed() {
        return Err(PolicyError::NonSelfSignedRoot {
            subject: root.subject().to_string(),
        }
        .into());
    }
    check_cert(root, Some(root), time)
}

fn format_time(ts: i64) -> String {
    OffsetDateTime::from_unix_timestamp(ts)
        .map(|t| t.to_string())
        .unwrap_or_else(|_| format!("@{ts}"))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use time::Duration;

    use super::*;
    use crate::digest::DigestAlgorithm;
    use crate::testutil;

    fn empty() -> BTreeMap<String, Vec<u8>> {
        BTreeMap::new()
    }

    fn digests_of(name: &str, data: &[u8]) -> BTreeMap<String, Digest> {
        let mut digests = BTreeMap::new();
        digests.insert(name.to_string(), DigestAlgorithm::DEFAULT.digest(data));
        digests
    }

    #[test]
    fn test_unsigned_rejected_by_strict_policies() {
        let chain = CertChain::new();
        let digests = digests_of("data.tar.gz", b"payload");

        let err = Policy::high_security()
            .verify(&chain, None, &digests, &empty())
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::UnsignedRejected(name)) if name == "HighSecurity");

        let err = Policy::medium_security()
            .verify(&chain, None, &digests, &empty())
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::UnsignedRejected(_)));

        assert_matches!(
            Policy::no_security().verify(&chain, None, &digests, &empty()),
            Ok(())
        );
    }

    #[test]
    fn test_almost_no_security_still_wants_signatures_for_digests() {
        let chain = CertChain::new();
        let digests = digests_of("data.tar.gz", b"payload");
        let err = Policy::almost_no_security()
            .verify(&chain, None, &digests, &empty())
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::MissingSignature(name)) if name == "data.tar.gz");
    }

    #[test]
    fn test_data_signature_round_trip_and_tamper() {
        let key = testutil::shared_rsa_key();
        let cert = testutil::valid_cert(&key, "signer");
        let chain = CertChain::from_certs(vec![cert]);

        let digests = digests_of("data.tar.gz", b"payload");
        let digest = &digests["data.tar.gz"];
        let mut signatures = BTreeMap::new();
        signatures.insert(
            "data.tar.gz".to_string(),
            key.sign(DigestAlgorithm::DEFAULT.sig_algo(), digest.bytes())
                .unwrap(),
        );

        assert_matches!(
            Policy::low_security().verify(&chain, None, &digests, &signatures),
            Ok(())
        );

        let wrong = digests_of("data.tar.gz", b"tampered payload");
        let err = Policy::low_security()
            .verify(&chain, None, &wrong, &signatures)
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::BadSignature(name)) if name == "data.tar.gz");
    }

    #[test]
    fn test_signer_validity_window() {
        let key = testutil::shared_rsa_key();
        let now = OffsetDateTime::now_utc();

        let expired = testutil::expired_cert(&key, "old", now - Duration::days(30));
        let chain = CertChain::from_certs(vec![expired]);
        let err = Policy::low_security()
            .verify(&chain, None, &BTreeMap::new(), &empty())
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::Expired { .. }));

        let future = testutil::self_signed_between(
            &key,
            "future",
            now + Duration::days(30),
            now + Duration::days(60),
        );
        let chain = CertChain::from_certs(vec![future]);
        let err = Policy::low_security()
            .verify(&chain, None, &BTreeMap::new(), &empty())
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::NotYetValid { .. }));
    }

    #[test]
    fn test_key_chain_mismatch() {
        let cert = testutil::valid_cert(&testutil::shared_rsa_key(), "holder");
        let chain = CertChain::from_certs(vec![cert]);
        let err = Policy::no_security()
            .verify(
                &chain,
                Some(&testutil::other_rsa_key()),
                &BTreeMap::new(),
                &empty(),
            )
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::KeyChainMismatch));
    }

    #[test]
    fn test_chain_adjacency_enforced() {
        let (root, _, _) = testutil::ec_chain("root one", "mid one", "leaf one");
        let (_, _, stray_leaf) = testutil::ec_chain("root two", "mid two", "leaf two");
        let chain = CertChain::from_certs(vec![root, stray_leaf]);

        let mut signatures = BTreeMap::new();
        signatures.insert("data.tar.gz".to_string(), vec![0u8; 8]);

        let err = Policy::medium_security()
            .verify(&chain, None, &BTreeMap::new(), &signatures)
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::IssuerMismatch { .. }));
    }

    #[test]
    fn test_root_must_be_self_signed() {
        let (_, intermediate, leaf) = testutil::ec_chain("root", "mid", "leaf");
        let chain = CertChain::from_certs(vec![intermediate, leaf]);

        let mut signatures = BTreeMap::new();
        signatures.insert("data.tar.gz".to_string(), vec![0u8; 8]);

        let err = Policy::medium_security()
            .verify(&chain, None, &BTreeMap::new(), &signatures)
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::NonSelfSignedRoot { .. }));
    }

    #[test]
    fn test_trust_store_gates_high_security_only() {
        let dir = tempfile::tempdir().unwrap();
        let (root, intermediate, leaf) = testutil::ec_chain("anchor", "mid", "leaf");
        let chain = CertChain::from_certs(vec![root.clone(), intermediate, leaf]);

        let mut signatures = BTreeMap::new();
        signatures.insert("data.tar.gz".to_string(), vec![0u8; 8]);

        // medium ignores the (empty) trust store
        assert_matches!(
            Policy::medium_security()
                .with_trust_dir(dir.path())
                .verify(&chain, None, &BTreeMap::new(), &signatures),
            Ok(())
        );

        let high = Policy::high_security().with_trust_dir(dir.path());
        let err = high
            .verify(&chain, None, &BTreeMap::new(), &signatures)
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::UntrustedRoot { .. }));

        TrustStore::new(dir.path()).add(&root).unwrap();
        assert_matches!(
            high.verify(&chain, None, &BTreeMap::new(), &signatures),
            Ok(())
        );
    }

    #[test]
    fn test_trust_digest_mismatch_on_subject_collision() {
        let dir = tempfile::tempdir().unwrap();
        let presented = testutil::valid_cert(&testutil::shared_rsa_key(), "shared name");
        let stored = testutil::valid_cert(&testutil::other_rsa_key(), "shared name");
        TrustStore::new(dir.path()).add(&stored).unwrap();

        let chain = CertChain::from_certs(vec![presented]);
        let mut signatures = BTreeMap::new();
        signatures.insert("data.tar.gz".to_string(), vec![0u8; 8]);

        let err = Policy::high_security()
            .with_trust_dir(dir.path())
            .verify(&chain, None, &BTreeMap::new(), &signatures)
            .unwrap_err();
        assert_matches!(err, Error::Policy(PolicyError::TrustDigestMismatch { .. }));
    }
}
