use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;

use crate::digest::{Digest, DigestAlgorithm};
use crate::error::Error;
use crate::io::DigestingReader;
use crate::policy::Policy;
use crate::spec::PackageSpec;

/// Streaming copy and digest granularity.
const CHUNK_SIZE: usize = 16 * 1024;

/// Pre-2007 archives open with an `MD5SUM =` header line.
const OLD_FORMAT_MARKER: &[u8] = b"MD5SUM =";

/// Reads a package archive: single-pass verification, then extraction.
pub struct PackageReader {
    path: PathBuf,
    policy: Option<Policy>,
    spec: Option<PackageSpec>,
    files: Vec<String>,
    verified: bool,
}

impl PackageReader {
    pub fn new(path: impl Into<PathBuf>, policy: Option<Policy>) -> Self {
        Self {
            path: path.into(),
            policy,
            spec: None,
            files: Vec::new(),
            verified: false,
        }
    }

    /// Member names seen during the last `verify`.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// The package metadata, verifying first if that has not happened yet.
    pub fn spec(&mut self) -> Result<&PackageSpec, Error> {
        if self.spec.is_none() {
            self.verify()?;
        }
        match &self.spec {
            Some(spec) => Ok(spec),
            None => Err(Error::format("package metadata is missing", Some(&self.path))),
        }
    }

    /// Scan the archive once: collect digests, signatures, and checksums,
    /// parse the metadata, and evaluate the attached policy.
    pub fn verify(&mut self) -> Result<(), Error> {
        self.spec = None;
        self.files.clear();
        self.verified = false;

        let mut file = File::open(&self.path)?;
        if is_old_format(&mut file)? {
            return Err(Error::format(
                "old-format (MD5SUM) package archives are read by the legacy reader, not this one",
                Some(&self.path),
            ));
        }
        file.seek(SeekFrom::Start(0))?;

        let mut parsed: Option<PackageSpec> = None;
        let mut digests: BTreeMap<String, Vec<Digest>> = BTreeMap::new();
        let mut signatures: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut checksums: BTreeMap<String, String> = BTreeMap::new();
        let mut data_seen = false;

        let mut archive = tar::Archive::new(file);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            self.files.push(name.clone());

            if let Some(base) = name.strip_suffix(".sig") {
                if self.policy.is_some() {
                    let mut body = Vec::new();
                    entry.read_to_end(&mut body)?;
                    signatures.insert(base.to_string(), body);
                }
                continue;
            }
            if let Some(base) = name.strip_suffix(".sum") {
                let mut body = String::new();
                entry.read_to_string(&mut body)?;
                checksums.insert(base.to_string(), body);
                continue;
            }

            if name == "metadata" || name == "metadata.gz" {
                if parsed.is_some() {
                    return Err(Error::format("duplicate metadata member", Some(&self.path)));
                }
                let (bytes, member_digests) = read_digested(&mut entry)?;
                parsed = Some(parse_metadata(&name, &bytes, &self.path)?);
                digests.insert(name, member_digests);
            } else if name == "data.tar.gz" {
                digests.insert(name, scan_payload(&mut entry, &self.path)?);
                data_seen = true;
            } else {
                digests.insert(name, digest_member(&mut entry)?);
            }
        }

        let Some(spec) = parsed else {
            return Err(Error::format("package metadata is missing", Some(&self.path)));
        };
        if !data_seen {
            return Err(Error::format(
                "package content (data.tar.gz) is missing",
                Some(&self.path),
            ));
        }

        verify_checksums(&digests, &checksums, &self.path)?;

        if let Some(policy) = &self.policy {
            let default_digests: BTreeMap<String, Digest> = digests
                .iter()
                .filter_map(|(name, list)| {
                    list.iter()
                        .find(|digest| digest.algorithm() == DigestAlgorithm::DEFAULT)
                        .map(|digest| (name.clone(), digest.clone()))
                })
                .collect();
            policy.verify_signatures(&spec, &default_digests, &signatures)?;
        }

        self.spec = Some(spec);
        self.verified = true;
        Ok(())
    }

    /// Extract the payload under `destination_dir`, verifying first when
    /// that has not happened yet. Every target path must stay inside the
    /// destination.
    pub fn extract_files(&mut self, destination_dir: &Path) -> Result<(), Error> {
        if !self.verified {
            self.verify()?;
        }
        fs::create_dir_all(destination_dir)?;
        let destination_dir = destination_dir.canonicalize()?;
        log::debug!(
            "extracting {} to {}",
            self.path.display(),
            destination_dir.display()
        );

        let file = File::open(&self.path)?;
        let mut archive = tar::Archive::new(file);
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.path_bytes().as_ref() != b"data.tar.gz" {
                continue;
            }
            let gz = GzDecoder::new(&mut entry);
            let mut payload = tar::Archive::new(gz);
            for inner in payload.entries()? {
                let mut inner = inner?;
                extract_entry(&mut inner, &destination_dir)?;
            }
            return Ok(());
        }
        Err(Error::format(
            "package content (data.tar.gz) is missing",
            Some(&self.path),
        ))
    }
}

/// Resolve a payload entry name under the destination directory, rejecting
/// anything that would land outside it.
pub fn install_location(filename: &str, destination_dir: &Path) -> Result<PathBuf, Error> {
    let destination_dir = normalize(destination_dir);
    let joined = destination_dir.join(filename);
    let destination = normalize(&joined);
    if !destination.starts_with(&destination_dir) {
        return Err(Error::Path {
            target: PathBuf::from(filename),
            destination: destination_dir,
        });
    }
    Ok(destination)
}

/// Lexical `.`/`..` resolution. A `..` that cannot be popped is kept, so the
/// containment check above fails for it.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let poppable = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if poppable {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn extract_entry<R: Read>(entry: &mut tar::Entry<'_, R>, destination_dir: &Path) -> Result<(), Error> {
    let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
    let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;
    let kind = entry.header().entry_type();

    let destination = install_location(&name, destination_dir)?;

    if kind.is_dir() {
        fs::create_dir_all(&destination)?;
        return Ok(());
    }
    if !kind.is_file() {
        log::warn!("skipping unsupported payload entry type {:?} for {name}", kind);
        return Ok(());
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(&destination) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let mut out = File::create(&destination)?;
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let read = entry.read(&mut buf)?;
        if read == 0 {
            break;
        }
        out.write_all(&buf[..read])?;
    }
    // filesystems without fsync support are tolerated
    let _ = out.sync_all();
    set_mode(&destination, mode)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn is_old_format(file: &mut File) -> Result<bool, Error> {
    let mut start = [0u8; 20];
    let mut filled = 0;
    while filled < start.len() {
        let read = file.read(&mut start[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(start[..filled]
        .windows(OLD_FORMAT_MARKER.len())
        .any(|window| window == OLD_FORMAT_MARKER))
}

/// Read a member to EOF, digesting it with every available algorithm, and
/// keep the bytes (used for the metadata member, which must be parsed).
fn read_digested<R: Read>(entry: R) -> Result<(Vec<u8>, Vec<Digest>), Error> {
    let inner = DigestingReader::new(entry, DigestAlgorithm::Sha512);
    let mut outer = DigestingReader::new(inner, DigestAlgorithm::Sha256);
    let mut bytes = Vec::new();
    outer.read_to_end(&mut bytes)?;
    let (inner, sha256) = outer.finish();
    let (_, sha512) = inner.finish();
    Ok((bytes, vec![sha256, sha512]))
}

/// Digest a member with every available algorithm without keeping its body.
fn digest_member<R: Read>(entry: R) -> Result<Vec<Digest>, Error> {
    let inner = DigestingReader::new(entry, DigestAlgorithm::Sha512);
    let mut outer = DigestingReader::new(inner, DigestAlgorithm::Sha256);
    drain(&mut outer)?;
    let (inner, sha256) = outer.finish();
    let (_, sha512) = inner.finish();
    Ok(vec![sha256, sha512])
}

/// Digest the compressed payload while checking its gzip framing end to
/// end.
fn scan_payload<R: Read>(entry: R, path: &Path) -> Result<Vec<Digest>, Error> {
    let inner = DigestingReader::new(entry, DigestAlgorithm::Sha512);
    let mut outer = DigestingReader::new(inner, DigestAlgorithm::Sha256);
    {
        let mut gz = GzDecoder::new(&mut outer);
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match gz.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(Error::format(
                        format!("corrupt gzip data in data.tar.gz: {err}"),
                        Some(path),
                    ))
                }
            }
        }
    }
    // pick up any bytes past the gzip stream so the digest covers the
    // member exactly
    drain(&mut outer)?;
    let (inner, sha256) = outer.finish();
    let (_, sha512) = inner.finish();
    Ok(vec![sha256, sha512])
}

fn drain<R: Read>(reader: &mut R) -> io::Result<()> {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        if reader.read(&mut buf)? == 0 {
            return Ok(());
        }
    }
}

fn parse_metadata(name: &str, bytes: &[u8], path: &Path) -> Result<PackageSpec, Error> {
    let yaml = if name.ends_with(".gz") {
        let mut gz = GzDecoder::new(bytes);
        let mut out = Vec::new();
        gz.read_to_end(&mut out).map_err(|err| {
            Error::format(format!("corrupt gzip data in {name}: {err}"), Some(path))
        })?;
        out
    } else {
        bytes.to_vec()
    };
    PackageSpec::from_yaml(&yaml)
}

/// Cross-check recorded `.sum` lines against the recomputed digests.
/// Checksums are advisory: unknown algorithms and sums naming absent
/// members are skipped, a recognized mismatch is fatal.
fn verify_checksums(
    digests: &BTreeMap<String, Vec<Digest>>,
    checksums: &BTreeMap<String, String>,
    path: &Path,
) -> Result<(), Error> {
    for (name, line) in checksums {
        let line = line.trim_end();
        let Some((algorithm_name, expected)) = line.split_once('\t') else {
            return Err(Error::format(
                format!("malformed checksum entry for {name}"),
                Some(path),
            ));
        };
        let Some(algorithm) = DigestAlgorithm::from_name(algorithm_name) else {
            log::warn!("ignoring checksum for {name}: unknown algorithm {algorithm_name}");
            continue;
        };
        let Some(member_digests) = digests.get(name) else {
            log::warn!("ignoring checksum for {name}: no such member");
            continue;
        };
        let Some(actual) = member_digests
            .iter()
            .find(|digest| digest.algorithm() == algorithm)
        else {
            continue;
        };
        if !actual.hex().eq_ignore_ascii_case(expected) {
            return Err(Error::format(
                format!("checksum mismatch for {name}"),
                Some(path),
            ));
        }
    }
    Ok(())
}
