//! Self-signed certificate issuance, used when an expired signing
//! certificate is replaced in place.

use anyhow::{anyhow, Context};
use rcgen::{CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose};
use time::OffsetDateTime;

/// Issue a self-signed certificate over an RSA private key.
///
/// `subject` is a sequence of (dotted OID, value) attribute pairs, as
/// returned by [`crate::Cert::subject_components`]. Returns the certificate
/// PEM.
pub fn self_signed(
    key_pkcs8_pem: &str,
    subject: &[(String, String)],
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> anyhow::Result<String> {
    let key_pair =
        KeyPair::from_pem(key_pkcs8_pem).context("parse signing key for certificate issuance")?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(subject)?;
    params.not_before = not_before;
    params.not_after = not_after;
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DataEncipherment,
    ];

    let cert = params
        .self_signed(&key_pair)
        .context("self-signed certificate generation failed")?;
    Ok(cert.pem())
}

fn distinguished_name(subject: &[(String, String)]) -> anyhow::Result<DistinguishedName> {
    let mut dn = DistinguishedName::new();
    for (oid, value) in subject {
        dn.push(dn_type(oid)?, value.as_str());
    }
    Ok(dn)
}

fn dn_type(oid: &str) -> anyhow::Result<DnType> {
    Ok(match oid {
        "2.5.4.3" => DnType::CommonName,
        "2.5.4.6" => DnType::CountryName,
        "2.5.4.7" => DnType::LocalityName,
        "2.5.4.8" => DnType::StateOrProvinceName,
        "2.5.4.10" => DnType::OrganizationName,
        "2.5.4.11" => DnType::OrganizationalUnitName,
        other => {
            let arcs = other
                .split('.')
                .map(str::parse::<u64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| anyhow!("invalid OID in subject: {}", other))?;
            DnType::CustomDnType(arcs)
        }
    })
}
