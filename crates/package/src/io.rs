//! Pass-through I/O wrappers that digest everything flowing through them.
//! The builder and reader use these to produce member digests in the same
//! pass that writes or scans the member, so nothing is buffered twice.

use std::io::{Read, Result, Write};

use crate::digest::{Digest, DigestAlgorithm, Hasher};

/// Write-side pass-through bound to one digest.
pub struct DigestingWriter<W: Write> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> DigestingWriter<W> {
    pub fn new(inner: W, algorithm: DigestAlgorithm) -> Self {
        Self {
            inner,
            hasher: algorithm.hasher(),
        }
    }

    /// Finish the stream, handing back the wrapped writer and the digest of
    /// everything written.
    pub fn finish(self) -> (W, Digest) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for DigestingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

/// Read-side pass-through bound to one digest.
pub struct DigestingReader<R: Read> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> DigestingReader<R> {
    pub fn new(inner: R, algorithm: DigestAlgorithm) -> Self {
        Self {
            inner,
            hasher: algorithm.hasher(),
        }
    }

    /// Hand back the wrapped reader and the digest of everything read.
    pub fn finish(self) -> (R, Digest) {
        (self.inner, self.hasher.finalize())
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn test_writer_digests_written_bytes() {
        let mut writer = DigestingWriter::new(Vec::new(), DigestAlgorithm::Sha256);
        writer.write_all(b"hello\n").unwrap();
        let (buf, digest) = writer.finish();
        assert_eq!(buf, b"hello\n");
        assert_eq!(digest, DigestAlgorithm::Sha256.digest(b"hello\n"));
    }

    #[test]
    fn test_reader_digests_read_bytes() {
        let mut reader = DigestingReader::new(&b"world\n"[..], DigestAlgorithm::Sha512);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        let (_, digest) = reader.finish();
        assert_eq!(out, b"world\n");
        assert_eq!(digest, DigestAlgorithm::Sha512.digest(b"world\n"));
    }

    #[test]
    fn test_nested_readers_see_identical_bytes() {
        let inner = DigestingReader::new(&b"payload"[..], DigestAlgorithm::Sha512);
        let mut outer = DigestingReader::new(inner, DigestAlgorithm::Sha256);
        std::io::copy(&mut outer, &mut std::io::sink()).unwrap();
        let (inner, sha256) = outer.finish();
        let (_, sha512) = inner.finish();
        assert_eq!(sha256, DigestAlgorithm::Sha256.digest(b"payload"));
        assert_eq!(sha512, DigestAlgorithm::Sha512.digest(b"payload"));
    }
}
