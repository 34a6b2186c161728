// Crash-safe filesystem helpers

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `data` to `path` through a sibling temp file and a rename, so readers
/// see either the old contents or the new ones, never a torn write.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = sibling(path, "tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Rename `path` to `<path>.<suffix>`, replacing an older file of that name
pub fn move_aside(path: &Path, suffix: &str) -> std::io::Result<PathBuf> {
    let target = sibling(path, suffix);
    if target.exists() {
        fs::remove_file(&target)?;
    }
    fs::rename(path, &target)?;
    Ok(target)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
