//! Collecting chars displayed by a web project.
//!
//! The collector is lossy: it applies regex [`ExtractionRule`]s rather than parsing
//! markup and scripts. Missing a rarely displayed dynamic string is possible; extra chars only
//! cost a few retained glyphs.

use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
};

use rayon::prelude::*;

pub use self::rules::ExtractionRule;
use crate::RunError;

mod rules;

/// Kind of scanned files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FileKind {
    /// HTML markup.
    Markup,
    /// JS / TS sources, JSON and single-file components.
    Script,
}

impl FileKind {
    const MARKUP_EXTENSIONS: &'static [&'static str] = &["html", "htm"];
    const SCRIPT_EXTENSIONS: &'static [&'static str] =
        &["js", "jsx", "ts", "tsx", "json", "mjs", "cjs", "vue"];

    /// Determines the file kind by the path extension (case-insensitive). Returns `None`
    /// for files that should not be scanned.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        if Self::MARKUP_EXTENSIONS.contains(&extension.as_str()) {
            Some(Self::Markup)
        } else if Self::SCRIPT_EXTENSIONS.contains(&extension.as_str()) {
            Some(Self::Script)
        } else {
            None
        }
    }

    /// Extracts chars from the file contents.
    pub fn extract_chars(self, contents: &str) -> BTreeSet<char> {
        let contents = match self {
            Self::Markup => rules::strip_non_rendering(contents),
            Self::Script => contents.into(),
        };
        let mut chars = BTreeSet::new();
        for rule in ExtractionRule::for_kind(self) {
            rule.apply(&contents, &mut chars);
        }
        chars
    }
}

/// Result of [`collect()`].
#[derive(Debug, Default)]
pub struct Collection {
    /// Union of chars found in all scanned files.
    pub chars: BTreeSet<char>,
    /// Number of successfully scanned files.
    pub files_scanned: usize,
    /// Number of files that were recognized, but could not be read or decoded.
    pub files_skipped: usize,
}

impl Collection {
    fn merge(mut self, other: Self) -> Self {
        if self.chars.len() < other.chars.len() {
            return other.merge(self);
        }
        self.chars.extend(other.chars);
        self.files_scanned += other.files_scanned;
        self.files_skipped += other.files_skipped;
        self
    }
}

/// Recursively collects chars from recognized files in `root`. Symlinks are not followed.
///
/// Files are scanned in parallel. A file that cannot be read or is not valid UTF-8 is logged
/// and skipped; it does not abort the scan.
///
/// # Errors
///
/// Returns an error if `root` itself cannot be read.
pub fn collect(root: &Path) -> Result<Collection, RunError> {
    let mut files = vec![];
    let entries = fs::read_dir(root).map_err(RunError::input(root))?;
    discover_files(entries, &mut files);
    files.sort_unstable_by(|(path, _), (other_path, _)| path.cmp(other_path));
    log::debug!("discovered {} file(s) to scan in `{}`", files.len(), root.display());

    let collection = files
        .par_iter()
        .map(|(path, kind)| match scan_file(path, *kind) {
            Ok(chars) => Collection {
                chars,
                files_scanned: 1,
                files_skipped: 0,
            },
            Err(err) => {
                log::warn!("failed processing file `{}`: {err}", path.display());
                Collection {
                    files_skipped: 1,
                    ..Collection::default()
                }
            }
        })
        .reduce(Collection::default, Collection::merge);

    log::info!(
        "processed {} file(s), {} distinct char(s) found",
        collection.files_scanned,
        collection.chars.len()
    );
    Ok(collection)
}

fn discover_files(entries: fs::ReadDir, files: &mut Vec<(PathBuf, FileKind)>) {
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("failed reading directory entry: {err}");
                continue;
            }
        };
        let path = entry.path();
        // `DirEntry::file_type()` does not traverse symlinks
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                log::warn!("failed getting type of `{}`: {err}", path.display());
                continue;
            }
        };

        if file_type.is_dir() {
            match fs::read_dir(&path) {
                Ok(entries) => discover_files(entries, files),
                Err(err) => log::warn!("failed reading directory `{}`: {err}", path.display()),
            }
        } else if file_type.is_file() {
            if let Some(kind) = FileKind::from_path(&path) {
                files.push((path, kind));
            }
        }
    }
}

fn scan_file(path: &Path, kind: FileKind) -> io::Result<BTreeSet<char>> {
    // Fails with `InvalidData` if the file is not UTF-8
    let contents = fs::read_to_string(path)?;
    let chars = kind.extract_chars(&contents);
    log::trace!("found {} char(s) in `{}`", chars.len(), path.display());
    Ok(chars)
}
