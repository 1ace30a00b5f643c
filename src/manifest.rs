//! Snapshot manifest loading.
//!
//! The snapshot list arrives as a delimited text file, one reference per
//! line with the reference in the first comma-separated field. The core only
//! requires an ordered sequence of strings; everything else about the format
//! stays here.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised while loading the snapshot manifest.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ManifestError {
    /// Raised when the manifest file cannot be read.
    #[error("failed to read snapshot manifest `{path}`: {message}")]
    Read {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the manifest contains no snapshot references.
    #[error("snapshot manifest `{path}` contains no snapshot references")]
    Empty {
        /// Path of the empty manifest.
        path: Utf8PathBuf,
    },
}

/// Reads the ordered snapshot reference list from `path`.
///
/// Blank lines and lines with an empty first field are skipped; surrounding
/// whitespace is trimmed from each reference.
///
/// # Errors
///
/// Returns [`ManifestError::Read`] when the file cannot be read and
/// [`ManifestError::Empty`] when no references remain after parsing.
pub fn load_snapshot_manifest(path: &Utf8Path) -> Result<Vec<String>, ManifestError> {
    let contents = read_to_string_ambient(path).map_err(|message| ManifestError::Read {
        path: path.to_owned(),
        message,
    })?;

    let snapshots = parse_manifest(&contents);
    if snapshots.is_empty() {
        return Err(ManifestError::Empty {
            path: path.to_owned(),
        });
    }
    Ok(snapshots)
}

fn parse_manifest(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Opens the manifest's parent directory with ambient authority and reads
/// the file relative to it.
fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let file_name = path
        .file_name()
        .ok_or_else(|| String::from("path has no file name"))?;
    let dir_path = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}
