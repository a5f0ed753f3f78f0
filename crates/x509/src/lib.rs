//! X.509 primitives for package signing: owned certificates and chains,
//! RSA private keys, and signature verification over RSA and ECDSA keys.

mod cert;
pub use cert::*;
mod key;
pub use key::*;
mod sign;
pub use sign::*;
pub mod issue;

// re-exports
pub use rsa;
pub use x509_parser;

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
    use time::{Duration, OffsetDateTime};

    use crate::{issue, Cert, CertChain, KeyAlgo, PrivateKey, SigAlgo, verify_signature};

    fn rsa_key() -> PrivateKey {
        static KEY: OnceLock<PrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let mut rng = rand::thread_rng();
            PrivateKey::from_rsa(rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap())
        })
        .clone()
    }

    fn issue_self_signed(key: &PrivateKey, cn: &str) -> Cert {
        let now = OffsetDateTime::now_utc();
        let subject = vec![("2.5.4.3".to_string(), cn.to_string())];
        let pem = issue::self_signed(
            &key.to_pkcs8_pem().unwrap(),
            &subject,
            now - Duration::days(1),
            now + Duration::days(365),
        )
        .unwrap();
        Cert::from_pem(pem.as_bytes()).unwrap()
    }

    fn ec_params(cn: &str) -> CertificateParams {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params
    }

    #[test]
    fn test_self_signed_rsa_cert() {
        let key = rsa_key();
        let cert = issue_self_signed(&key, "packager");

        assert!(cert.is_self_signed());
        assert_eq!(cert.subject(), cert.issuer());
        assert!(cert.subject().contains("packager"));
        assert_eq!(cert.key_algo(), KeyAlgo::Rsa);
        assert!(cert.verify_issued_by(&cert.public_key()).unwrap());
        assert!(key.matches_spki(cert.spki_der()).unwrap());
    }

    #[test]
    fn test_cert_pem_round_trip() {
        let cert = issue_self_signed(&rsa_key(), "round-trip");
        let reparsed = Cert::from_pem(cert.to_pem().as_bytes()).unwrap();
        assert_eq!(reparsed.der(), cert.der());
        assert_eq!(reparsed.subject(), cert.subject());
    }

    #[test]
    fn test_subject_components_survive_reissue() {
        let key = rsa_key();
        let cert = issue_self_signed(&key, "reissue@example");
        let components = cert.subject_components().unwrap();
        assert_eq!(components, vec![("2.5.4.3".to_string(), "reissue@example".to_string())]);

        let now = OffsetDateTime::now_utc();
        let pem = issue::self_signed(
            &key.to_pkcs8_pem().unwrap(),
            &components,
            now,
            now + Duration::days(30),
        )
        .unwrap();
        let successor = Cert::from_pem(pem.as_bytes()).unwrap();
        assert_eq!(successor.subject(), cert.subject());
    }

    #[test]
    fn test_ec_chain_verifies_root_to_leaf() {
        let root_key = KeyPair::generate().unwrap();
        let mut root_params = ec_params("test root");
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let root_cert = root_params.self_signed(&root_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf_cert = ec_params("test leaf")
            .signed_by(&leaf_key, &root_cert, &root_key)
            .unwrap();

        let root = Cert::from_der(root_cert.der()).unwrap();
        let leaf = Cert::from_der(leaf_cert.der()).unwrap();

        assert_eq!(root.key_algo(), KeyAlgo::EcdsaP256);
        assert_eq!(leaf.issuer(), root.subject());
        assert!(leaf.verify_issued_by(&root.public_key()).unwrap());
        assert!(!leaf.verify_issued_by(&leaf.public_key()).unwrap());

        let chain = CertChain::from_certs(vec![root, leaf]);
        assert!(chain.is_closed());
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.leaf().unwrap().subject(), "CN=test leaf");
    }

    #[test]
    fn test_p384_chain_verifies_root_to_leaf() {
        let root_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).unwrap();
        let mut root_params = ec_params("p384 root");
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let root_cert = root_params.self_signed(&root_key).unwrap();

        let leaf_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).unwrap();
        let leaf_cert = ec_params("p384 leaf")
            .signed_by(&leaf_key, &root_cert, &root_key)
            .unwrap();

        let root = Cert::from_der(root_cert.der()).unwrap();
        let leaf = Cert::from_der(leaf_cert.der()).unwrap();

        assert_eq!(root.key_algo(), KeyAlgo::EcdsaP384);
        assert_eq!(leaf.key_algo(), KeyAlgo::EcdsaP384);
        assert!(root.verify_issued_by(&root.public_key()).unwrap());
        assert!(leaf.verify_issued_by(&root.public_key()).unwrap());
        assert!(!leaf.verify_issued_by(&leaf.public_key()).unwrap());
    }

    #[test]
    fn test_private_key_pem_round_trip() {
        use rsa::pkcs1::EncodeRsaPrivateKey;

        let key = rsa_key();
        let pkcs8 = key.to_pkcs8_pem().unwrap();
        assert_eq!(PrivateKey::from_pem(pkcs8.as_bytes()).unwrap(), key);

        let mut rng = rand::thread_rng();
        let raw = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pkcs1 = raw.to_pkcs1_pem(rsa::pkcs8::LineEnding::LF).unwrap();
        assert_eq!(
            PrivateKey::from_pem(pkcs1.as_bytes()).unwrap(),
            PrivateKey::from_rsa(raw)
        );
    }

    #[test]
    fn test_sign_and_verify_message() {
        let key = rsa_key();
        let cert = issue_self_signed(&key, "signer");

        for sig_algo in [SigAlgo::RsaSha256, SigAlgo::RsaSha384, SigAlgo::RsaSha512] {
            let signature = key.sign(sig_algo, b"package digest").unwrap();
            assert_eq!(signature.len(), key.signature_len());
            assert!(
                verify_signature(&cert.public_key(), sig_algo, &signature, b"package digest")
                    .unwrap()
            );
            assert!(
                !verify_signature(&cert.public_key(), sig_algo, &signature, b"tampered").unwrap()
            );
        }

        // a signature is bound to its digest: verifying under another
        // algorithm fails
        let signature = key.sign(SigAlgo::RsaSha256, b"package digest").unwrap();
        assert!(
            !verify_signature(&cert.public_key(), SigAlgo::RsaSha512, &signature, b"package digest")
                .unwrap()
        );
    }

    #[test]
    fn test_parse_pem_blocks_keeps_order() {
        let key = rsa_key();
        let a = issue_self_signed(&key, "first");
        let b = issue_self_signed(&key, "second");
        let chain = CertChain::parse_pem_blocks([a.to_pem(), b.to_pem()]).unwrap();
        assert_eq!(chain.root().unwrap().subject(), "CN=first");
        assert_eq!(chain.leaf().unwrap().subject(), "CN=second");
    }
}
