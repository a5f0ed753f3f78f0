//! Shared signing fixtures. RSA key generation is slow, so tests reuse two
//! process-wide keys.

use std::sync::OnceLock;

use gempack_x509::{issue, Cert, PrivateKey};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use time::{Duration, OffsetDateTime};

pub(crate) fn shared_rsa_key() -> PrivateKey {
    static KEY: OnceLock<PrivateKey> = OnceLock::new();
    KEY.get_or_init(generate).clone()
}

pub(crate) fn other_rsa_key() -> PrivateKey {
    static KEY: OnceLock<PrivateKey> = OnceLock::new();
    KEY.get_or_init(generate).clone()
}

fn generate() -> PrivateKey {
    let mut rng = rand::thread_rng();
    PrivateKey::from_rsa(gempack_x509::rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap())
}

pub(crate) fn self_signed_between(
    key: &PrivateKey,
    cn: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Cert {
    let subject = vec![("2.5.4.3".to_string(), cn.to_string())];
    let pem = issue::self_signed(&key.to_pkcs8_pem().unwrap(), &subject, not_before, not_after)
        .unwrap();
    Cert::from_pem(pem.as_bytes()).unwrap()
}

pub(crate) fn valid_cert(key: &PrivateKey, cn: &str) -> Cert {
    let now = OffsetDateTime::now_utc();
    self_signed_between(key, cn, now - Duration::days(1), now + Duration::days(3650))
}

pub(crate) fn expired_cert(key: &PrivateKey, cn: &str, not_after: OffsetDateTime) -> Cert {
    self_signed_between(key, cn, not_after - Duration::days(365), not_after)
}

fn ec_params(cn: &str, ca: bool) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    if ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }
    params
}

/// Three-deep ECDSA chain: root CA, intermediate CA, leaf.
pub(crate) fn ec_chain(root_cn: &str, mid_cn: &str, leaf_cn: &str) -> (Cert, Cert, Cert) {
    let root_key = KeyPair::generate().unwrap();
    let root_cert = ec_params(root_cn, true).self_signed(&root_key).unwrap();

    let mid_key = KeyPair::generate().unwrap();
    let mid_cert = ec_params(mid_cn, true)
        .signed_by(&mid_key, &root_cert, &root_key)
        .unwrap();

    let leaf_key = KeyPair::generate().unwrap();
    let leaf_cert = ec_params(leaf_cn, false)
        .signed_by(&leaf_key, &mid_cert, &mid_key)
        .unwrap();

    (
        Cert::from_der(root_cert.der()).unwrap(),
        Cert::from_der(mid_cert.der()).unwrap(),
        Cert::from_der(leaf_cert.der()).unwrap(),
    )
}

/// A certificate whose issuer field names `issuer_cn` (signed by a throwaway
/// CA of that name).
pub(crate) fn cert_with_issuer(cn: &str, issuer_cn: &str) -> Cert {
    let issuer_key = KeyPair::generate().unwrap();
    let issuer_cert = ec_params(issuer_cn, true).self_signed(&issuer_key).unwrap();

    let key = KeyPair::generate().unwrap();
    let cert = ec_params(cn, false)
        .signed_by(&key, &issuer_cert, &issuer_key)
        .unwrap();
    Cert::from_der(cert.der()).unwrap()
}
