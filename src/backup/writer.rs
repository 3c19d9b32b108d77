//! Session writer
//!
//! Streams source files into a compressed archive and proves the archive is
//! readable before it becomes visible under its final name.
//!
//! Archives are written to `<archive>.partial`, re-read entry by entry and
//! checked against the embedded manifest, then renamed into place. Nothing
//! half-written ever carries a final archive name.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::CancelToken;
use crate::config::ArchiveKind;
use crate::error::{BackupError, BackupResult};

/// Name of the manifest entry (relative path -> SHA-256)
pub const MANIFEST_NAME: &str = ".diffback-manifest.json";

const PARTIAL_SUFFIX: &str = ".partial";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A file to archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInput {
    /// Entry name inside the archive
    pub relative_path: String,
    /// Where the file lives now
    pub source_path: PathBuf,
}

impl ArchiveInput {
    pub fn new(relative_path: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            source_path: source_path.into(),
        }
    }
}

/// What ended up in an archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Archive size on disk
    pub size_bytes: u64,
    /// Files stored
    pub file_count: u64,
    /// Inputs that vanished before they could be read
    pub skipped: Vec<String>,
}

/// One stored file as listed by `ArchiveFormat::entries`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub relative_path: String,
    /// Uncompressed size
    pub size: u64,
    /// SHA-256 from the manifest, when the manifest lists it
    pub checksum: Option<String>,
}

/// An archive container the engine can write, inspect, check and unpack
pub trait ArchiveFormat: Send + Sync {
    /// File extension without the dot
    fn extension(&self) -> &'static str;

    /// Write `files` into a new archive at `archive`
    fn write(
        &self,
        files: &[ArchiveInput],
        archive: &Path,
        cancel: &CancelToken,
    ) -> BackupResult<WriteSummary>;

    /// List stored files
    fn entries(&self, archive: &Path) -> BackupResult<Vec<ArchiveEntry>>;

    /// Read back every entry and compare it with the manifest
    ///
    /// Any failure is reported as `Integrity`.
    fn verify(&self, archive: &Path) -> BackupResult<()>;

    fn is_intact(&self, archive: &Path) -> bool {
        self.verify(archive).is_ok()
    }

    /// Extract entries accepted by `filter` below `destination`
    ///
    /// Returns the relative paths written.
    fn unpack(
        &self,
        archive: &Path,
        destination: &Path,
        filter: &dyn Fn(&str) -> bool,
        cancel: &CancelToken,
    ) -> BackupResult<Vec<String>>;
}

impl ArchiveKind {
    /// The format implementation for this kind
    pub fn create_format(self) -> Box<dyn ArchiveFormat> {
        match self {
            ArchiveKind::Zip => Box::new(ZipFormat),
        }
    }
}

/// Deflate-compressed zip archives with an embedded SHA-256 manifest
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipFormat;

impl ZipFormat {
    fn open(archive: &Path) -> BackupResult<ZipArchive<BufReader<File>>> {
        let file = File::open(archive).map_err(|e| {
            BackupError::Io(format!("Failed to open archive {}: {}", archive.display(), e))
        })?;
        Ok(ZipArchive::new(BufReader::new(file))?)
    }

    fn read_manifest<R: Read + io::Seek>(
        zip: &mut ZipArchive<R>,
    ) -> BackupResult<BTreeMap<String, String>> {
        let mut entry = zip.by_name(MANIFEST_NAME)?;
        let mut contents = String::new();
        entry.read_to_string(&mut contents)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn check(archive: &Path) -> BackupResult<()> {
        let mut zip = Self::open(archive)?;
        let manifest = Self::read_manifest(&mut zip)?;
        let mut seen = 0usize;

        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            if entry.is_dir() || entry.name() == MANIFEST_NAME {
                continue;
            }

            let name = entry.name().to_string();
            let expected = manifest
                .get(&name)
                .ok_or_else(|| BackupError::Archive(format!("entry {} not in manifest", name)))?;

            // Reading to the end also checks the entry's CRC-32
            let actual = hash_reader(&mut entry)?;
            if &actual != expected {
                return Err(BackupError::Archive(format!("checksum mismatch for {}", name)));
            }
            seen += 1;
        }

        if seen != manifest.len() {
            return Err(BackupError::Archive(format!(
                "manifest lists {} files, archive holds {}",
                manifest.len(),
                seen
            )));
        }

        Ok(())
    }
}

impl ArchiveFormat for ZipFormat {
    fn extension(&self) -> &'static str {
        "zip"
    }

    fn write(
        &self,
        files: &[ArchiveInput],
        archive: &Path,
        cancel: &CancelToken,
    ) -> BackupResult<WriteSummary> {
        let file = File::create(archive).map_err(|e| {
            BackupError::Io(format!("Failed to create archive {}: {}", archive.display(), e))
        })?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);

        let mut manifest = BTreeMap::new();
        let mut summary = WriteSummary::default();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

        for input in files {
            cancel.check("archiving")?;

            let mut source = match File::open(&input.source_path) {
                Ok(source) => source,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(
                        "File {} disappeared before archiving, skipping",
                        input.source_path.display()
                    );
                    summary.skipped.push(input.relative_path.clone());
                    continue;
                }
                Err(e) => {
                    return Err(BackupError::Io(format!(
                        "Failed to open {}: {}",
                        input.source_path.display(),
                        e
                    )))
                }
            };

            zip.start_file(input.relative_path.as_str(), options)?;
            let mut hasher = Sha256::new();
            loop {
                let read = source.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
                zip.write_all(&buffer[..read])?;
            }

            manifest.insert(
                input.relative_path.clone(),
                format!("{:x}", hasher.finalize()),
            );
            summary.file_count += 1;
        }

        zip.start_file(MANIFEST_NAME, options)?;
        zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

        let file = zip.finish()?;
        file.sync_all()?;
        summary.size_bytes = file.metadata()?.len();

        Ok(summary)
    }

    fn entries(&self, archive: &Path) -> BackupResult<Vec<ArchiveEntry>> {
        let mut zip = Self::open(archive)?;
        let manifest = Self::read_manifest(&mut zip).unwrap_or_default();

        let mut entries = Vec::new();
        for index in 0..zip.len() {
            let entry = zip.by_index(index)?;
            if entry.is_dir() || entry.name() == MANIFEST_NAME {
                continue;
            }
            entries.push(ArchiveEntry {
                relative_path: entry.name().to_string(),
                size: entry.size(),
                checksum: manifest.get(entry.name()).cloned(),
            });
        }

        Ok(entries)
    }

    fn verify(&self, archive: &Path) -> BackupResult<()> {
        Self::check(archive).map_err(|e| BackupError::Integrity {
            archive: archive.to_path_buf(),
            detail: e.to_string(),
        })
    }

    fn unpack(
        &self,
        archive: &Path,
        destination: &Path,
        filter: &dyn Fn(&str) -> bool,
        cancel: &CancelToken,
    ) -> BackupResult<Vec<String>> {
        let mut zip = Self::open(archive)?;
        let mut written = Vec::new();

        for index in 0..zip.len() {
            cancel.check("restoring")?;

            let mut entry = zip.by_index(index)?;
            if entry.is_dir() || entry.name() == MANIFEST_NAME || !filter(entry.name()) {
                continue;
            }

            let relative = entry.enclosed_name().ok_or_else(|| {
                BackupError::Archive(format!("unsafe entry path {}", entry.name()))
            })?;
            let target = make_room(destination, &relative)?;
            let mut out = File::create(&target).map_err(|e| {
                BackupError::Io(format!("Failed to create {}: {}", target.display(), e))
            })?;
            io::copy(&mut entry, &mut out)?;
            written.push(entry.name().to_string());
        }

        Ok(written)
    }
}

/// Clear whatever an earlier session left in the way of `relative`
///
/// A later session wins when a path changed type: files standing where a
/// parent directory is needed are removed, and so is a directory standing
/// where the file goes. Returns the file path to write.
fn make_room(destination: &Path, relative: &Path) -> BackupResult<PathBuf> {
    let mut ancestors: Vec<&Path> = relative
        .ancestors()
        .skip(1)
        .filter(|a| !a.as_os_str().is_empty())
        .collect();
    ancestors.reverse();

    for ancestor in ancestors {
        let dir = destination.join(ancestor);
        match fs::symlink_metadata(&dir) {
            Ok(meta) if !meta.is_dir() => {
                debug!("Replacing file {} with a directory", dir.display());
                fs::remove_file(&dir)?;
            }
            _ => {}
        }
    }

    let target = destination.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Ok(meta) = fs::symlink_metadata(&target) {
        if meta.is_dir() {
            debug!("Replacing directory {} with a file", target.display());
            fs::remove_dir_all(&target)?;
        }
    }

    Ok(target)
}

fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Writes session archives through the partial-verify-rename protocol
pub struct SessionWriter {
    format: Box<dyn ArchiveFormat>,
}

impl SessionWriter {
    pub fn new(format: Box<dyn ArchiveFormat>) -> Self {
        Self { format }
    }

    pub fn for_kind(kind: ArchiveKind) -> Self {
        Self::new(kind.create_format())
    }

    pub fn format(&self) -> &dyn ArchiveFormat {
        self.format.as_ref()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    /// Write and verify an archive at `destination`
    ///
    /// On any failure, including cancellation, the partial file is removed
    /// and `destination` is left untouched.
    pub fn write(
        &self,
        files: &[ArchiveInput],
        destination: &Path,
        cancel: &CancelToken,
    ) -> BackupResult<WriteSummary> {
        let partial = partial_path(destination);

        let result = self
            .format
            .write(files, &partial, cancel)
            .and_then(|summary| {
                self.format.verify(&partial)?;
                fs::rename(&partial, destination).map_err(|e| {
                    BackupError::Io(format!(
                        "Failed to move archive into place at {}: {}",
                        destination.display(),
                        e
                    ))
                })?;
                Ok(summary)
            });

        match &result {
            Ok(summary) => debug!(
                "Wrote {} ({} files, {} bytes)",
                destination.display(),
                summary.file_count,
                summary.size_bytes
            ),
            Err(_) => {
                if partial.exists() {
                    if let Err(e) = fs::remove_file(&partial) {
                        warn!("Failed to remove {}: {}", partial.display(), e);
                    }
                }
            }
        }

        result
    }
}

/// `<archive>.partial`
pub fn partial_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Delete partial archives left by an interrupted run
///
/// Only call this while holding the destination lock.
pub fn remove_stale_partials(dir: &Path) -> BackupResult<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_partial = path
            .file_name()
            .map_or(false, |name| name.to_string_lossy().ends_with(PARTIAL_SUFFIX));
        if is_partial && path.is_file() {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_tree(temp: &TempDir) -> Vec<ArchiveInput> {
        let docs = temp.path().join("docs");
        fs::create_dir_all(docs.join("sub")).unwrap();
        fs::write(docs.join("a.txt"), "alpha").unwrap();
        fs::write(docs.join("sub/b.txt"), "bravo").unwrap();
        vec![
            ArchiveInput::new("docs/a.txt", docs.join("a.txt")),
            ArchiveInput::new("docs/sub/b.txt", docs.join("sub/b.txt")),
        ]
    }

    /// Writes a zip whose manifest disagrees with its contents
    struct TamperedFormat;

    impl ArchiveFormat for TamperedFormat {
        fn extension(&self) -> &'static str {
            "zip"
        }

        fn write(
            &self,
            _files: &[ArchiveInput],
            archive: &Path,
            _cancel: &CancelToken,
        ) -> BackupResult<WriteSummary> {
            let mut zip = ZipWriter::new(File::create(archive)?);
            let options = SimpleFileOptions::default();
            zip.start_file("docs/a.txt", options)?;
            zip.write_all(b"alpha")?;
            zip.start_file(MANIFEST_NAME, options)?;
            zip.write_all(br#"{"docs/a.txt": "0000"}"#)?;
            zip.finish()?;
            Ok(WriteSummary {
                size_bytes: 1,
                file_count: 1,
                skipped: Vec::new(),
            })
        }

        fn entries(&self, archive: &Path) -> BackupResult<Vec<ArchiveEntry>> {
            ZipFormat.entries(archive)
        }

        fn verify(&self, archive: &Path) -> BackupResult<()> {
            ZipFormat.verify(archive)
        }

        fn unpack(
            &self,
            archive: &Path,
            destination: &Path,
            filter: &dyn Fn(&str) -> bool,
            cancel: &CancelToken,
        ) -> BackupResult<Vec<String>> {
            ZipFormat.unpack(archive, destination, filter, cancel)
        }
    }

    #[test]
    fn test_write_verify_and_unpack() {
        let temp = TempDir::new().unwrap();
        let inputs = source_tree(&temp);
        let archive = temp.path().join("session.zip");

        let writer = SessionWriter::for_kind(ArchiveKind::Zip);
        let summary = writer.write(&inputs, &archive, &CancelToken::new()).unwrap();

        assert_eq!(summary.file_count, 2);
        assert!(summary.size_bytes > 0);
        assert!(archive.exists());
        assert!(!partial_path(&archive).exists());
        assert!(writer.format().is_intact(&archive));

        let entries = writer.format().entries(&archive).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.checksum.is_some()));

        let out = temp.path().join("out");
        let written = writer
            .format()
            .unpack(&archive, &out, &|_| true, &CancelToken::new())
            .unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(fs::read_to_string(out.join("docs/sub/b.txt")).unwrap(), "bravo");
    }

    #[test]
    fn test_unpack_filter() {
        let temp = TempDir::new().unwrap();
        let inputs = source_tree(&temp);
        let archive = temp.path().join("session.zip");
        ZipFormat
            .write(&inputs, &archive, &CancelToken::new())
            .unwrap();

        let out = temp.path().join("out");
        let written = ZipFormat
            .unpack(
                &archive,
                &out,
                &|path| path.starts_with("docs/sub/"),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(written, vec!["docs/sub/b.txt".to_string()]);
        assert!(!out.join("docs/a.txt").exists());
    }

    #[test]
    fn test_vanished_input_is_skipped() {
        let temp = TempDir::new().unwrap();
        let mut inputs = source_tree(&temp);
        inputs.push(ArchiveInput::new("docs/gone.txt", temp.path().join("gone.txt")));
        let archive = temp.path().join("session.zip");

        let summary = SessionWriter::new(Box::new(ZipFormat))
            .write(&inputs, &archive, &CancelToken::new())
            .unwrap();

        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.skipped, vec!["docs/gone.txt".to_string()]);
    }

    #[test]
    fn test_integrity_failure_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let inputs = source_tree(&temp);
        let archive = temp.path().join("session.zip");

        let err = SessionWriter::new(Box::new(TamperedFormat))
            .write(&inputs, &archive, &CancelToken::new())
            .unwrap_err();

        assert!(err.is_integrity());
        assert!(!archive.exists());
        assert!(!partial_path(&archive).exists());
    }

    #[test]
    fn test_cancelled_write_removes_partial() {
        let temp = TempDir::new().unwrap();
        let inputs = source_tree(&temp);
        let archive = temp.path().join("session.zip");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = SessionWriter::for_kind(ArchiveKind::Zip)
            .write(&inputs, &archive, &cancel)
            .unwrap_err();

        assert!(matches!(err, BackupError::Cancelled(_)));
        assert!(!archive.exists());
        assert!(!partial_path(&archive).exists());
    }

    #[test]
    fn test_verify_detects_truncation() {
        let temp = TempDir::new().unwrap();
        let inputs = source_tree(&temp);
        let archive = temp.path().join("session.zip");
        ZipFormat
            .write(&inputs, &archive, &CancelToken::new())
            .unwrap();

        let bytes = fs::read(&archive).unwrap();
        fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

        assert!(ZipFormat.verify(&archive).unwrap_err().is_integrity());
    }

    #[test]
    fn test_remove_stale_partials() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a-full.zip.partial"), "x").unwrap();
        fs::write(temp.path().join("b-full.zip"), "x").unwrap();

        assert_eq!(remove_stale_partials(temp.path()).unwrap(), 1);
        assert!(temp.path().join("b-full.zip").exists());
        assert_eq!(remove_stale_partials(&temp.path().join("none")).unwrap(), 0);
    }
}
