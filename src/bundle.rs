//! Runtime-asset bundle deployed into every album.
//!
//! The viewer's HTML, script and stylesheet files are packed at build time
//! (see `build.rs`) into one blob and embedded in the binary, so the tool
//! ships as a single executable. The format is a flat run of records:
//!
//! ```text
//! 0x0000000c photo/app.js 0x000004d2 <1234 bytes>
//! └ path len ┘└── path ──┘└ data len ┘└── data ──┘
//! ```
//!
//! Each length is ten ASCII characters: `0x` followed by eight hex digits.
//! There are no separators between fields.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::imaging::Storage;

/// The runtime bundle packed from `assets/runtime/`.
pub static RUNTIME: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/runtime.bundle"));

const LENGTH_FIELD: usize = 10;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupted bundle at byte {0}")]
    Corrupted(usize),
    #[error("bundle path escapes the destination: {0}")]
    UnsafePath(String),
}

/// One file of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry<'a> {
    pub path: &'a str,
    pub data: &'a [u8],
}

fn length_field(len: usize) -> String {
    format!("0x{len:08x}")
}

/// Pack `(path, data)` pairs into the bundle format.
pub fn pack(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (path, data) in entries {
        out.extend_from_slice(length_field(path.len()).as_bytes());
        out.extend_from_slice(path.as_bytes());
        out.extend_from_slice(length_field(data.len()).as_bytes());
        out.extend_from_slice(data);
    }
    out
}

fn read_length(bundle: &[u8], at: usize) -> Result<usize, BundleError> {
    let field = bundle
        .get(at..at + LENGTH_FIELD)
        .ok_or(BundleError::Corrupted(at))?;
    let text = std::str::from_utf8(field).map_err(|_| BundleError::Corrupted(at))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or(BundleError::Corrupted(at))?;
    usize::from_str_radix(digits, 16).map_err(|_| BundleError::Corrupted(at))
}

/// Split a bundle into its entries without copying.
pub fn unpack(bundle: &[u8]) -> Result<Vec<BundleEntry<'_>>, BundleError> {
    let mut entries = Vec::new();
    let mut at = 0;
    while at < bundle.len() {
        let path_len = read_length(bundle, at)?;
        at += LENGTH_FIELD;
        let path = bundle
            .get(at..at + path_len)
            .and_then(|p| std::str::from_utf8(p).ok())
            .ok_or(BundleError::Corrupted(at))?;
        at += path_len;
        let data_len = read_length(bundle, at)?;
        at += LENGTH_FIELD;
        let data = bundle
            .get(at..at + data_len)
            .ok_or(BundleError::Corrupted(at))?;
        at += data_len;
        entries.push(BundleEntry { path, data });
    }
    Ok(entries)
}

fn safe_relative(path: &str) -> Result<&Path, BundleError> {
    let relative = Path::new(path);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(BundleError::UnsafePath(path.to_string()));
    }
    Ok(relative)
}

/// Write every entry of `bundle` below `destination`, creating directories
/// as needed.
///
/// Every directory and file created is appended to `created` as soon as it
/// exists, so a caller can undo a partial deploy after an error.
pub fn deploy(
    bundle: &[u8],
    destination: &Path,
    storage: &dyn Storage,
    created: &mut Vec<PathBuf>,
) -> Result<usize, BundleError> {
    let entries = unpack(bundle)?;
    for entry in &entries {
        let target = destination.join(safe_relative(entry.path)?);
        if let Some(parent) = target.parent() {
            create_dirs(parent, destination, storage, created)?;
        }
        storage.write(&target, entry.data)?;
        created.push(target);
    }
    tracing::debug!(files = entries.len(), dest = %destination.display(), "runtime deployed");
    Ok(entries.len())
}

/// Create `dir` and its missing ancestors, never climbing above `root`.
fn create_dirs(
    dir: &Path,
    root: &Path,
    storage: &dyn Storage,
    created: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    if dir == root || storage.exists(dir) {
        return Ok(());
    }
    if let Some(parent) = dir.parent() {
        create_dirs(parent, root, storage, created)?;
    }
    storage.create_dir(dir)?;
    created.push(dir.to_path_buf());
    Ok(())
}
