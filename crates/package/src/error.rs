use std::io;
use std::path::{Path, PathBuf};

/// Errors raised while building, verifying, or extracting packages.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The archive is malformed: missing members, bad framing, checksum
    /// mismatch.
    #[error("package format error: {reason}{}", fmt_path(.path))]
    Format {
        reason: String,
        path: Option<PathBuf>,
    },

    /// An extraction target would land outside the destination directory.
    #[error("installing into parent path {} of {}", .target.display(), .destination.display())]
    Path {
        target: PathBuf,
        destination: PathBuf,
    },

    /// A verification policy rejected the package.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Certificate or key material could not be parsed or used.
    #[error("security error: {0}")]
    Crypto(#[from] anyhow::Error),

    /// Underlying filesystem or stream failure.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn format(reason: impl Into<String>, path: Option<&Path>) -> Self {
        Error::Format {
            reason: reason.into(),
            path: path.map(Path::to_path_buf),
        }
    }
}

fn fmt_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

/// The ways a verification policy can reject a package.
#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
    #[error("unsigned packages are not allowed by the {0} policy")]
    UnsignedRejected(String),

    #[error("certificate public key does not match the signing key")]
    KeyChainMismatch,

    #[error("certificate {subject} is not valid before {not_before}")]
    NotYetValid { subject: String, not_before: String },

    #[error("certificate {subject} expired on {not_after}")]
    Expired { subject: String, not_after: String },

    #[error("certificate {subject} was not issued by {issuer}")]
    IssuerMismatch { subject: String, issuer: String },

    #[error("root certificate {subject} is not trusted")]
    UntrustedRoot { subject: String },

    #[error("trusted root for {subject} does not match the presented certificate")]
    TrustDigestMismatch { subject: String },

    #[error("missing signature for {0}")]
    MissingSignature(String),

    #[error("invalid signature for {0}")]
    BadSignature(String),

    #[error("root certificate {subject} is not self-signed")]
    NonSelfSignedRoot { subject: String },

    #[error("no certificate chain to verify signatures against")]
    MissingCertChain,
}
