//! Whole-document JSON persistence.
//!
//! Every save rewrites the full document through a sibling temp file and a
//! rename, so a crash mid-write leaves the previous durable copy intact.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Load a document, falling back to `T::default()` when the file is missing or unreadable.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match load(path) {
        Ok(Some(v)) => v,
        Ok(None) => T::default(),
        Err(e) => {
            warn!(path = %path.display(), "starting from empty state: {e}");
            T::default()
        }
    }
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = fs::read_to_string(path)?;
    let v = serde_json::from_str(&txt)?;
    Ok(Some(v))
}

pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let persistence = |reason: String| Error::Persistence {
        path: path.to_path_buf(),
        reason,
    };

    let txt = serde_json::to_string_pretty(value).map_err(|e| persistence(e.to_string()))?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| persistence(e.to_string()))?;
    }

    let tmp = temp_path(path);
    let write = || -> std::io::Result<()> {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(txt.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        persistence(e.to_string())
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
