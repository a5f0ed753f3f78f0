use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Error;
use crate::io::DigestingWriter;
use crate::paths::Locations;
use crate::signer::{CertSource, Signer};
use crate::spec::PackageSpec;

/// Assembles package archives: metadata, compressed payload, and one
/// detached signature sidecar per signed member.
pub struct PackageBuilder {
    locations: Locations,
}

impl Default for PackageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self {
            locations: Locations::resolve(),
        }
    }

    pub fn with_locations(locations: Locations) -> Self {
        Self { locations }
    }

    /// Build `spec` into `<output_dir>/<name>-<version>.gem`, reading the
    /// listed payload files relative to `files_root`. Returns the archive
    /// path.
    pub fn build(
        &self,
        spec: &PackageSpec,
        files_root: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, Error> {
        // builder-local copy: the caller's spec is never mutated
        let mut spec = spec.clone();
        spec.validate()?;
        spec.mark_version();

        let mut signer = match spec.signing_key.take() {
            Some(key) => {
                let chain = spec
                    .cert_chain
                    .iter()
                    .map(|blob| CertSource::Pem(blob.clone().into_bytes()))
                    .collect();
                Signer::with_locations(Some(key), chain, self.locations.clone())?
            }
            None => Signer::unsigned(self.locations.clone())?,
        };
        if !signer.chain().is_empty() {
            spec.cert_chain = signer.cert_chain_pem();
        }

        fs::create_dir_all(output_dir)?;
        let archive_path = output_dir.join(format!("{}.gem", spec.full_name()));
        log::debug!("building package {}", archive_path.display());

        let file = File::create(&archive_path)?;
        let mut outer = tar::Builder::new(file);

        // metadata.gz first, its signature sidecar right behind it
        let yaml = spec.to_yaml()?;
        let mut writer = DigestingWriter::new(Vec::new(), signer.digest_algorithm());
        {
            let mut gz = GzEncoder::new(&mut writer, Compression::default());
            gz.write_all(yaml.as_bytes())?;
            gz.finish()?;
        }
        let (compressed, digest) = writer.finish();
        append_member(&mut outer, "metadata.gz", &compressed)?;
        if let Some(signature) = signer.sign(digest.bytes())? {
            append_member(&mut outer, "metadata.gz.sig", &signature)?;
        }

        // data.tar.gz, spooled through an anonymous temp file so the
        // payload streams once
        let spool = tempfile::tempfile()?;
        let mut writer = DigestingWriter::new(spool, signer.digest_algorithm());
        {
            let gz = GzEncoder::new(&mut writer, Compression::default());
            let mut inner = tar::Builder::new(gz);
            for name in &spec.files {
                append_payload_file(&mut inner, files_root, name)?;
            }
            let gz = inner.into_inner()?;
            gz.finish()?;
        }
        let (mut spool, digest) = writer.finish();
        spool.flush()?;
        let size = spool.seek(SeekFrom::End(0))?;
        spool.seek(SeekFrom::Start(0))?;

        let mut header = tar::Header::new_gnu();
        header.set_size(size);
        header.set_mode(0o444);
        header.set_mtime(mtime_now());
        outer.append_data(&mut header, "data.tar.gz", &mut spool)?;
        if let Some(signature) = signer.sign(digest.bytes())? {
            append_member(&mut outer, "data.tar.gz.sig", &signature)?;
        }

        let mut file = outer.into_inner()?;
        file.flush()?;
        Ok(archive_path)
    }
}

fn append_member<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<(), Error> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o444);
    header.set_mtime(mtime_now());
    builder.append_data(&mut header, name, bytes)?;
    Ok(())
}

fn append_payload_file<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    name: &str,
) -> Result<(), Error> {
    let path = root.join(name);
    let mut file = File::open(&path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => {
            Error::format(format!("listed file is missing: {name}"), Some(&path))
        }
        _ => Error::Io(err),
    })?;
    let metadata = file.metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_size(metadata.len());
    header.set_mode(file_mode(&metadata));
    header.set_mtime(mtime_now());
    builder.append_data(&mut header, name, &mut file)?;
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

fn mtime_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
