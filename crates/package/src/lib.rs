//! Signed package archives: build, verify, extract.
//!
//! A package is an uncompressed tar holding `metadata.gz` (the gzipped YAML
//! metadata document), `data.tar.gz` (the gzipped payload tar), and optional
//! sidecars: `<member>.sig` carries a detached RSA signature over the bytes
//! of `<member>`, `<member>.sum` a plaintext checksum line. Signing uses an
//! RSA private key plus an X.509 certificate chain; verification is driven
//! by the named policies between [`Policy::no_security`] and
//! [`Policy::high_security`], anchored in an on-disk [`TrustStore`].

mod builder;
pub use builder::*;
mod digest;
pub use digest::*;
mod error;
pub use error::*;
mod io;
pub use io::*;
mod paths;
pub use paths::*;
mod policy;
pub use policy::*;
mod reader;
pub use reader::*;
mod signer;
pub use signer::*;
mod spec;
pub use spec::*;
mod trust;
pub use trust::*;

// re-exports
pub use gempack_x509 as x509;

#[cfg(test)]
mod testutil;
