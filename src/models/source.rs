//! Backup source model
//!
//! A source is one configured folder plus its recursion flag. Sources are
//! written in config either as `"<path>, R|NR"` lines or as objects.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BackupError;

/// A folder to back up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FolderEntry")]
pub struct BackupSource {
    /// Folder path
    pub path: PathBuf,
    /// Whether subdirectories are included
    pub recursive: bool,
}

/// Accepted config shapes for a folder
#[derive(Deserialize)]
#[serde(untagged)]
enum FolderEntry {
    Line(String),
    Entry {
        path: PathBuf,
        #[serde(default = "default_recursive")]
        recursive: bool,
    },
}

fn default_recursive() -> bool {
    true
}

impl TryFrom<FolderEntry> for BackupSource {
    type Error = BackupError;

    fn try_from(entry: FolderEntry) -> Result<Self, Self::Error> {
        match entry {
            FolderEntry::Line(line) => line.parse(),
            FolderEntry::Entry { path, recursive } => Ok(Self { path, recursive }),
        }
    }
}

impl BackupSource {
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
        }
    }

    /// Archive label for this source: its final path component
    pub fn base_label(&self) -> String {
        let trimmed = self
            .path
            .to_string_lossy()
            .trim_end_matches(['/', '\\'])
            .to_string();
        Path::new(&trimmed)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "root".to_string())
    }
}

impl FromStr for BackupSource {
    type Err = BackupError;

    /// Parse `"<path>, R"` (recursive) or `"<path>, NR"` (non-recursive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, flag) = s.rsplit_once(',').ok_or_else(|| {
            BackupError::Config(format!(
                "Invalid folder entry '{}': expected '<path>, R|NR'",
                s.trim()
            ))
        })?;

        let path = path.trim();
        if path.is_empty() {
            return Err(BackupError::Config(format!(
                "Invalid folder entry '{}': empty path",
                s.trim()
            )));
        }

        Ok(Self {
            path: PathBuf::from(path),
            recursive: flag.trim().eq_ignore_ascii_case("R"),
        })
    }
}

impl fmt::Display for BackupSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = if self.recursive { "R" } else { "NR" };
        write!(f, "{}, {}", self.path.display(), flag)
    }
}

/// A source paired with the unique label its files are archived under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelledSource {
    pub label: String,
    pub source: BackupSource,
}

/// Assign unique archive labels, suffixing repeats with `~2`, `~3`, ...
///
/// A suffixed label is checked against every label handed out so far, so a
/// source literally named `docs~2` cannot collide with the second `docs`.
pub fn label_sources(sources: &[BackupSource]) -> Vec<LabelledSource> {
    let mut assigned: HashSet<String> = HashSet::new();

    sources
        .iter()
        .map(|source| {
            let base = source.base_label();
            let mut label = base.clone();
            let mut suffix = 1;
            while assigned.contains(&label) {
                suffix += 1;
                label = format!("{}~{}", base, suffix);
            }
            assigned.insert(label.clone());
            LabelledSource {
                label,
                source: source.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_folder_line() {
        let source: BackupSource = "/home/me/docs, R".parse().unwrap();
        assert_eq!(source.path, PathBuf::from("/home/me/docs"));
        assert!(source.recursive);

        let source: BackupSource = "C:/Users/me/Music , nr".parse().unwrap();
        assert_eq!(source.path, PathBuf::from("C:/Users/me/Music"));
        assert!(!source.recursive);
    }

    #[test]
    fn test_parse_rejects_missing_flag() {
        assert!("/home/me/docs".parse::<BackupSource>().is_err());
        assert!(" , R".parse::<BackupSource>().is_err());
    }

    #[test]
    fn test_display_round_trips_line_form() {
        let source = BackupSource::new("/docs", false);
        assert_eq!(source.to_string(), "/docs, NR");
        assert_eq!(source.to_string().parse::<BackupSource>().unwrap(), source);
    }

    #[test]
    fn test_base_label_ignores_trailing_separator() {
        assert_eq!(BackupSource::new("/home/me/docs/", true).base_label(), "docs");
        assert_eq!(BackupSource::new("/", true).base_label(), "root");
    }

    #[test]
    fn test_duplicate_labels_are_suffixed() {
        let labelled = label_sources(&[
            BackupSource::new("/a/docs", true),
            BackupSource::new("/b/docs", true),
            BackupSource::new("/c/music", false),
        ]);
        let labels: Vec<_> = labelled.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["docs", "docs~2", "music"]);
    }

    #[test]
    fn test_suffixed_label_skips_taken_names() {
        let labelled = label_sources(&[
            BackupSource::new("/a/docs", true),
            BackupSource::new("/b/docs", true),
            BackupSource::new("/c/docs~2", true),
            BackupSource::new("/d/docs", true),
        ]);
        let labels: Vec<_> = labelled.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["docs", "docs~2", "docs~2~2", "docs~3"]);
    }
}
