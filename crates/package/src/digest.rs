use gempack_x509::SigAlgo;
use sha2::Digest as _;

/// Digest algorithms available for member checksums and data signatures.
///
/// SHA-256 is the signing default; MD5 and SHA-1 are deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub const DEFAULT: DigestAlgorithm = DigestAlgorithm::Sha256;

    /// The name written into `.sum` sidecars.
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA256",
            DigestAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Accepts `SHA256`, `sha256`, and `SHA-256` spellings.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "SHA256" => Some(DigestAlgorithm::Sha256),
            "SHA512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn hasher(self) -> Hasher {
        match self {
            DigestAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        }
    }

    /// The signature algorithm covering digests of this kind.
    pub fn sig_algo(self) -> SigAlgo {
        match self {
            DigestAlgorithm::Sha256 => SigAlgo::RsaSha256,
            DigestAlgorithm::Sha512 => SigAlgo::RsaSha512,
        }
    }

    pub fn digest(self, data: &[u8]) -> Digest {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

/// Incremental digest computation over one stream.
#[derive(Clone)]
pub enum Hasher {
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(hasher) => hasher.update(data),
            Hasher::Sha512(hasher) => hasher.update(data),
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        match self {
            Hasher::Sha256(_) => DigestAlgorithm::Sha256,
            Hasher::Sha512(_) => DigestAlgorithm::Sha512,
        }
    }

    pub fn finalize(self) -> Digest {
        match self {
            Hasher::Sha256(hasher) => Digest {
                algorithm: DigestAlgorithm::Sha256,
                bytes: hasher.finalize().to_vec(),
            },
            Hasher::Sha512(hasher) => Digest {
                algorithm: DigestAlgorithm::Sha512,
                bytes: hasher.finalize().to_vec(),
            },
        }
    }
}

/// A finished digest: the algorithm plus its output bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl Digest {
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}
