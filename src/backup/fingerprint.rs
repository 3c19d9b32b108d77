//! Fingerprint store
//!
//! Walks the configured sources, fingerprints every regular file and diffs
//! the result against the baseline of the last full backup.
//!
//! Hashing runs on a bounded rayon pool. On differential scans a file whose
//! size and modification time both match the baseline keeps its baseline
//! hash and is not read again, unless strict hashing is configured.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::writer::ArchiveInput;
use super::CancelToken;
use crate::error::{BackupError, BackupResult};
use crate::models::{
    label_sources, BackupSource, FileFingerprint, FingerprintDiff, FingerprintSet,
};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Result of scanning the sources
#[derive(Debug, Default)]
pub struct FingerprintScan {
    /// One fingerprint per regular file found
    pub fingerprints: FingerprintSet,
    /// Relative path -> file on disk
    pub files: BTreeMap<String, PathBuf>,
    /// Sources that do not exist (or are not directories)
    pub missing_sources: Vec<PathBuf>,
    /// Files that disappeared between listing and hashing
    pub vanished: Vec<PathBuf>,
    /// Number of files whose contents were read
    pub hashed: usize,
}

impl FingerprintScan {
    /// Archive inputs for every scanned file
    pub fn all_inputs(&self) -> Vec<ArchiveInput> {
        self.files
            .iter()
            .map(|(relative, path)| ArchiveInput::new(relative.clone(), path.clone()))
            .collect()
    }

    /// Archive inputs for the given relative paths
    pub fn inputs_for(&self, paths: &BTreeSet<String>) -> Vec<ArchiveInput> {
        paths
            .iter()
            .filter_map(|relative| {
                self.files
                    .get(relative)
                    .map(|path| ArchiveInput::new(relative.clone(), path.clone()))
            })
            .collect()
    }
}

/// A file found by the walk, not yet hashed
#[derive(Debug)]
struct Candidate {
    relative_path: String,
    path: PathBuf,
    size: u64,
    modified_at: DateTime<Utc>,
}

enum Hashed {
    Done {
        fingerprint: FileFingerprint,
        path: PathBuf,
        /// Contents were read (not reused from the baseline)
        read: bool,
    },
    Vanished(PathBuf),
}

/// Computes and compares file fingerprints
pub struct FingerprintStore {
    pool: rayon::ThreadPool,
}

impl FingerprintStore {
    /// Create a store hashing on `workers` threads (0 = one per CPU)
    pub fn new(workers: usize) -> BackupResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("diffback-hash-{}", i))
            .build()
            .map_err(|e| BackupError::Config(format!("Failed to build hashing pool: {}", e)))?;
        Ok(Self { pool })
    }

    /// Fingerprint every regular file under the sources, hashing all of them
    pub fn compute_fingerprints(
        &self,
        sources: &[BackupSource],
        cancel: &CancelToken,
    ) -> BackupResult<FingerprintScan> {
        self.scan(sources, None, cancel)
    }

    /// Fingerprint the sources, reusing baseline hashes for files whose size
    /// and modification time are unchanged (unless `strict`)
    pub fn compute_against(
        &self,
        sources: &[BackupSource],
        baseline: &FingerprintSet,
        strict: bool,
        cancel: &CancelToken,
    ) -> BackupResult<FingerprintScan> {
        if strict {
            self.scan(sources, None, cancel)
        } else {
            self.scan(sources, Some(baseline), cancel)
        }
    }

    /// Files changed or added in `current`, and files gone from `baseline`
    pub fn diff(current: &FingerprintSet, baseline: &FingerprintSet) -> FingerprintDiff {
        let changed = current
            .iter()
            .filter(|fp| {
                baseline
                    .get(&fp.relative_path)
                    .map_or(true, |base| fp.differs_from(base))
            })
            .map(|fp| fp.relative_path.clone())
            .collect();

        let deleted = baseline
            .paths()
            .filter(|path| !current.contains(path))
            .map(str::to_string)
            .collect();

        FingerprintDiff { changed, deleted }
    }

    fn scan(
        &self,
        sources: &[BackupSource],
        reuse: Option<&FingerprintSet>,
        cancel: &CancelToken,
    ) -> BackupResult<FingerprintScan> {
        let mut scan = FingerprintScan::default();
        let mut candidates = Vec::new();

        for labelled in label_sources(sources) {
            let root = &labelled.source.path;
            if !root.is_dir() {
                warn!("Source folder {} does not exist, skipping", root.display());
                scan.missing_sources.push(root.clone());
                continue;
            }
            list_files(
                &labelled.label,
                root,
                labelled.source.recursive,
                &mut candidates,
                cancel,
            )?;
        }

        debug!("Found {} files to fingerprint", candidates.len());

        let results: Vec<BackupResult<Hashed>> = self.pool.install(|| {
            candidates
                .into_par_iter()
                .map(|candidate| {
                    cancel.check("fingerprinting")?;
                    fingerprint_candidate(candidate, reuse)
                })
                .collect()
        });

        for result in results {
            match result? {
                Hashed::Done {
                    fingerprint,
                    path,
                    read,
                } => {
                    if read {
                        scan.hashed += 1;
                    }
                    let relative = fingerprint.relative_path.clone();
                    if let Some(previous) = scan.files.insert(relative.clone(), path.clone()) {
                        return Err(BackupError::Config(format!(
                            "{} and {} would both be archived as {}",
                            previous.display(),
                            path.display(),
                            relative
                        )));
                    }
                    scan.fingerprints.insert(fingerprint);
                }
                Hashed::Vanished(path) => {
                    warn!("File {} disappeared during scan, skipping", path.display());
                    scan.vanished.push(path);
                }
            }
        }

        Ok(scan)
    }
}

/// List regular files under `root`, label-rooting their relative paths
fn list_files(
    label: &str,
    root: &Path,
    recursive: bool,
    out: &mut Vec<Candidate>,
    cancel: &CancelToken,
) -> BackupResult<()> {
    let mut walker = WalkDir::new(root).min_depth(1).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    for entry in walker {
        cancel.check("listing files")?;

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), err);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Skipping {}: {}", entry.path().display(), err);
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| {
                BackupError::Io(format!(
                    "Failed to read modification time of {}: {}",
                    entry.path().display(),
                    e
                ))
            })?;

        let Some(relative_path) = archive_path(label, relative) else {
            warn!(
                "Skipping {}: file names must be valid UTF-8",
                entry.path().display()
            );
            continue;
        };

        out.push(Candidate {
            relative_path,
            path: entry.path().to_path_buf(),
            size: metadata.len(),
            modified_at,
        });
    }

    Ok(())
}

/// `label/sub/dir/file` with `/` separators regardless of platform
///
/// `None` when a component is not valid UTF-8, since archive entry names
/// could not tell such names apart.
pub fn archive_path(label: &str, relative: &Path) -> Option<String> {
    let mut path = label.to_string();
    for component in relative.components() {
        path.push('/');
        path.push_str(component.as_os_str().to_str()?);
    }
    Some(path)
}

fn fingerprint_candidate(
    candidate: Candidate,
    reuse: Option<&FingerprintSet>,
) -> BackupResult<Hashed> {
    if let Some(base) = reuse.and_then(|set| set.get(&candidate.relative_path)) {
        if base.size == candidate.size && base.modified_at == candidate.modified_at {
            return Ok(Hashed::Done {
                fingerprint: base.clone(),
                path: candidate.path,
                read: false,
            });
        }
    }

    match hash_file(&candidate.path) {
        Ok(content_hash) => Ok(Hashed::Done {
            fingerprint: FileFingerprint {
                relative_path: candidate.relative_path,
                size: candidate.size,
                modified_at: candidate.modified_at,
                content_hash,
            },
            path: candidate.path,
            read: true,
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Hashed::Vanished(candidate.path)),
        Err(e) => Err(BackupError::Io(format!(
            "Failed to hash {}: {}",
            candidate.path.display(),
            e
        ))),
    }
}

/// Lowercase hex SHA-256 of a file's contents
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_file(path: &Path, contents: &str, secs: u64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    fn docs_tree() -> (TempDir, Vec<BackupSource>) {
        let temp = TempDir::new().unwrap();
        let docs = temp.path().join("docs");
        write_file(&docs.join("a.txt"), "alpha", 1_700_000_000);
        write_file(&docs.join("sub/b.txt"), "bravo", 1_700_000_000);
        (temp, vec![BackupSource::new(docs, true)])
    }

    fn store() -> FingerprintStore {
        FingerprintStore::new(2).unwrap()
    }

    #[test]
    fn test_paths_are_label_rooted() {
        let (_temp, sources) = docs_tree();
        let scan = store()
            .compute_fingerprints(&sources, &CancelToken::new())
            .unwrap();

        let paths: Vec<&str> = scan.fingerprints.paths().collect();
        assert_eq!(paths, vec!["docs/a.txt", "docs/sub/b.txt"]);
        assert_eq!(scan.hashed, 2);
        assert_eq!(scan.all_inputs().len(), 2);
    }

    #[test]
    fn test_sources_with_clashing_labels_keep_all_files() {
        let temp = TempDir::new().unwrap();
        let sources: Vec<BackupSource> = ["a/docs", "b/docs", "c/docs~2"]
            .iter()
            .map(|dir| {
                let root = temp.path().join(dir);
                write_file(&root.join("same.txt"), dir, 1_700_000_000);
                BackupSource::new(root, true)
            })
            .collect();

        let scan = store()
            .compute_fingerprints(&sources, &CancelToken::new())
            .unwrap();

        let paths: Vec<&str> = scan.fingerprints.paths().collect();
        assert_eq!(
            paths,
            vec!["docs/same.txt", "docs~2/same.txt", "docs~2~2/same.txt"]
        );
        assert_eq!(scan.all_inputs().len(), 3);
    }

    #[test]
    fn test_archive_path_joins_with_slashes() {
        let relative = Path::new("sub").join("b.txt");
        assert_eq!(archive_path("docs", &relative).as_deref(), Some("docs/sub/b.txt"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (temp, sources) = docs_tree();
        let docs = temp.path().join("docs");
        fs::write(docs.join(OsStr::from_bytes(b"bad\xffname")), "x").unwrap();
        fs::write(docs.join(OsStr::from_bytes(b"bad\xfename")), "y").unwrap();

        assert_eq!(archive_path("docs", Path::new(OsStr::from_bytes(b"bad\xff"))), None);

        let scan = store()
            .compute_fingerprints(&sources, &CancelToken::new())
            .unwrap();
        let paths: Vec<&str> = scan.fingerprints.paths().collect();
        assert_eq!(paths, vec!["docs/a.txt", "docs/sub/b.txt"]);
    }

    #[test]
    fn test_non_recursive_lists_direct_children_only() {
        let (temp, _) = docs_tree();
        let sources = vec![BackupSource::new(temp.path().join("docs"), false)];
        let scan = store()
            .compute_fingerprints(&sources, &CancelToken::new())
            .unwrap();

        assert_eq!(scan.fingerprints.len(), 1);
        assert!(scan.fingerprints.contains("docs/a.txt"));
    }

    #[test]
    fn test_missing_source_is_reported() {
        let (temp, mut sources) = docs_tree();
        let missing = temp.path().join("nope");
        sources.push(BackupSource::new(&missing, true));

        let scan = store()
            .compute_fingerprints(&sources, &CancelToken::new())
            .unwrap();

        assert_eq!(scan.missing_sources, vec![missing]);
        assert_eq!(scan.fingerprints.len(), 2);
    }

    #[test]
    fn test_diff_of_unchanged_tree_is_empty() {
        let (_temp, sources) = docs_tree();
        let first = store()
            .compute_fingerprints(&sources, &CancelToken::new())
            .unwrap();
        let second = store()
            .compute_fingerprints(&sources, &CancelToken::new())
            .unwrap();

        assert_eq!(first.fingerprints, second.fingerprints);
        assert!(FingerprintStore::diff(&second.fingerprints, &first.fingerprints).is_empty());
    }

    #[test]
    fn test_diff_reports_new_changed_and_deleted() {
        let (temp, sources) = docs_tree();
        let docs = temp.path().join("docs");
        let baseline = store()
            .compute_fingerprints(&sources, &CancelToken::new())
            .unwrap()
            .fingerprints;

        write_file(&docs.join("a.txt"), "alpha, edited", 1_700_000_100);
        write_file(&docs.join("x.txt"), "new", 1_700_000_100);
        fs::remove_file(docs.join("sub/b.txt")).unwrap();

        let scan = store()
            .compute_against(&sources, &baseline, false, &CancelToken::new())
            .unwrap();
        let diff = FingerprintStore::diff(&scan.fingerprints, &baseline);

        let changed: Vec<&str> = diff.changed.iter().map(String::as_str).collect();
        let deleted: Vec<&str> = diff.deleted.iter().map(String::as_str).collect();
        assert_eq!(changed, vec!["docs/a.txt", "docs/x.txt"]);
        assert_eq!(deleted, vec!["docs/sub/b.txt"]);
        assert_eq!(scan.inputs_for(&diff.changed).len(), 2);
    }

    #[test]
    fn test_unchanged_metadata_reuses_baseline_hash() {
        let (temp, sources) = docs_tree();
        let baseline = store()
            .compute_fingerprints(&sources, &CancelToken::new())
            .unwrap()
            .fingerprints;

        // Same size and mtime, different contents
        write_file(&temp.path().join("docs/a.txt"), "ALPHA", 1_700_000_000);

        let relaxed = store()
            .compute_against(&sources, &baseline, false, &CancelToken::new())
            .unwrap();
        assert_eq!(relaxed.hashed, 0);
        assert!(FingerprintStore::diff(&relaxed.fingerprints, &baseline).is_empty());

        let strict = store()
            .compute_against(&sources, &baseline, true, &CancelToken::new())
            .unwrap();
        assert_eq!(strict.hashed, 2);
        let diff = FingerprintStore::diff(&strict.fingerprints, &baseline);
        assert!(diff.changed.contains("docs/a.txt"));
    }

    #[test]
    fn test_cancelled_scan() {
        let (_temp, sources) = docs_tree();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = store().compute_fingerprints(&sources, &cancel).unwrap_err();
        assert!(matches!(err, BackupError::Cancelled(_)));
    }

    #[test]
    fn test_hash_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        fs::write(&path, "hello").unwrap();

        assert_eq!(
            hash_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
