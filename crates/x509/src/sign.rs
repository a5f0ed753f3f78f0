use anyhow::anyhow;
use p256::ecdsa::signature::Verifier;
use rsa::pkcs8::DecodePublicKey;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256, Sha384, Sha512};
use x509_parser::der_parser::asn1_rs::Oid;
use x509_parser::oid_registry;
use x509_parser::x509::AlgorithmIdentifier;

/// Public key algorithm carried in a SubjectPublicKeyInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgo {
    Rsa,
    EcdsaP256,
    EcdsaP384,
}

impl KeyAlgo {
    pub fn from_algo(algo: &AlgorithmIdentifier<'_>) -> anyhow::Result<Self> {
        let oid = algo.oid();
        if *oid == oid_registry::OID_PKCS1_RSAENCRYPTION {
            return Ok(KeyAlgo::Rsa);
        }
        if *oid == oid_registry::OID_KEY_TYPE_EC_PUBLIC_KEY {
            let params = algo
                .parameters
                .as_ref()
                .ok_or_else(|| anyhow!("EC key without curve parameters"))?;
            let curve = params
                .as_oid()
                .map_err(|err| anyhow!("bad EC curve parameters: {:?}", err))?;
            if curve == oid_registry::OID_EC_P256 {
                return Ok(KeyAlgo::EcdsaP256);
            }
            if curve == oid_registry::OID_NIST_EC_P384 {
                return Ok(KeyAlgo::EcdsaP384);
            }
            return Err(anyhow!("unsupported EC curve: {}", curve));
        }
        Err(anyhow!("unsupported public key algorithm: {}", oid))
    }
}

/// Signature algorithm: padding/curve plus digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigAlgo {
    RsaSha256,
    RsaSha384,
    RsaSha512,
    EcdsaSha256,
    EcdsaSha384,
}

impl SigAlgo {
    pub fn from_oid(oid: &Oid<'_>) -> anyhow::Result<Self> {
        if *oid == oid_registry::OID_PKCS1_SHA256WITHRSA {
            return Ok(SigAlgo::RsaSha256);
        }
        if *oid == oid_registry::OID_PKCS1_SHA384WITHRSA {
            return Ok(SigAlgo::RsaSha384);
        }
        if *oid == oid_registry::OID_PKCS1_SHA512WITHRSA {
            return Ok(SigAlgo::RsaSha512);
        }
        if *oid == oid_registry::OID_SIG_ECDSA_WITH_SHA256 {
            return Ok(SigAlgo::EcdsaSha256);
        }
        if *oid == oid_registry::OID_SIG_ECDSA_WITH_SHA384 {
            return Ok(SigAlgo::EcdsaSha384);
        }
        Err(anyhow!("unsupported signature algorithm: {}", oid))
    }

    pub fn check_compatible_with(self, key: KeyAlgo) -> anyhow::Result<()> {
        let ok = match (self, key) {
            (SigAlgo::RsaSha256 | SigAlgo::RsaSha384 | SigAlgo::RsaSha512, KeyAlgo::Rsa) => true,
            (SigAlgo::EcdsaSha256, KeyAlgo::EcdsaP256) => true,
            (SigAlgo::EcdsaSha384, KeyAlgo::EcdsaP384) => true,
            _ => false,
        };
        if !ok {
            return Err(anyhow!(
                "signature algorithm {:?} is not compatible with a {:?} key",
                self,
                key
            ));
        }
        Ok(())
    }
}

/// A public key as presented by a certificate: the algorithm plus the full
/// SubjectPublicKeyInfo DER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubKey<'a> {
    pub algo: KeyAlgo,
    pub spki: &'a [u8],
}

/// Check `signature` over `message` against `key`.
///
/// Returns `Ok(false)` for a well-formed but wrong signature; parse failures
/// of the key itself are errors.
pub fn verify_signature(
    key: &PubKey<'_>,
    sig_algo: SigAlgo,
    signature: &[u8],
    message: &[u8],
) -> anyhow::Result<bool> {
    sig_algo.check_compatible_with(key.algo)?;
    match key.algo {
        KeyAlgo::Rsa => {
            let rsa_key = rsa::RsaPublicKey::from_public_key_der(key.spki)
                .map_err(|err| anyhow!("parse RSA public key failed: {}", err))?;
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
                _ => {
                    return Err(anyhow!(
                        "signature algorithm {:?} is not usable with an RSA key",
                        sig_algo
                    ))
                }
            };
            Ok(rsa_key.verify(padding, &hashed, signature).is_ok())
        }
        KeyAlgo::EcdsaP256 => {
            let verifying_key = p256::ecdsa::VerifyingKey::from_public_key_der(key.spki)
                .map_err(|err| anyhow!("parse P-256 public key failed: {}", err))?;
            let Ok(signature) = p256::ecdsa::Signature::from_der(signature) else {
                return Ok(false);
            };
            Ok(verifying_key.verify(message, &signature).is_ok())
        }
        KeyAlgo::EcdsaP384 => {
            let verifying_key = p384::ecdsa::VerifyingKey::from_public_key_der(key.spki)
                .map_err(|err| anyhow!("parse P-384 public key failed: {}", err))?;
            let Ok(signature) = p384::ecdsa::Signature::from_der(signature) else {
                return Ok(false);
            };
            Ok(verifying_key.verify(message, &signature).is_ok())
        }
    }
}
