use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Archive;

use super::version::Version;
use crate::error::{EdgeError, Result};
use crate::platform::write_atomic;

const RELEASES_DIR: &str = "releases";
const CURRENT_POINTER: &str = "current";
const STAGING_PREFIX: &str = ".staging-";

/// Places verified artifacts on disk and flips the active release
pub trait Stager: Send + Sync {
    /// Unpack or copy the artifact into the release slot for `version`
    fn stage(&self, version: &Version, artifact_name: &str, artifact: &[u8]) -> Result<PathBuf>;

    fn is_staged(&self, version: &Version) -> bool;

    /// Atomically point the active release at `version`
    fn activate(&self, version: &Version) -> Result<()>;

    /// Drop the active pointer so the base installation runs again
    fn clear_active(&self) -> Result<()>;

    fn active_version(&self) -> Result<Option<Version>>;

    fn discard(&self, version: &Version) -> Result<()>;

    /// Delete every staged release not listed in `keep`; returns what was removed
    fn prune(&self, keep: &[Version]) -> Result<Vec<Version>>;
}

/// Release layout under an install root:
///
/// ```text
/// <root>/releases/<version>/   staged artifacts
/// <root>/current               text file holding the active version
/// ```
pub struct FileStager {
    root: PathBuf,
}

impl FileStager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn release_dir(&self, version: &Version) -> PathBuf {
        self.releases_dir().join(version.to_string())
    }

    fn releases_dir(&self) -> PathBuf {
        self.root.join(RELEASES_DIR)
    }

    fn pointer_path(&self) -> PathBuf {
        self.root.join(CURRENT_POINTER)
    }

    fn staging_dir(&self, version: &Version) -> PathBuf {
        self.releases_dir()
            .join(format!("{}{}", STAGING_PREFIX, version))
    }

    fn write_artifact(dir: &Path, artifact_name: &str, artifact: &[u8]) -> Result<()> {
        if artifact_name.ends_with(".tar.gz") || artifact_name.ends_with(".tgz") {
            let decoder = GzDecoder::new(artifact);
            let mut archive = Archive::new(decoder);
            archive
                .unpack(dir)
                .map_err(|e| EdgeError::staging(format!("failed to extract {}: {}", artifact_name, e)))?;
            return Ok(());
        }

        let file_name = Path::new(artifact_name)
            .file_name()
            .ok_or_else(|| EdgeError::staging(format!("invalid artifact name '{}'", artifact_name)))?;
        fs::write(dir.join(file_name), artifact)?;
        Ok(())
    }
}

impl Stager for FileStager {
    fn stage(&self, version: &Version, artifact_name: &str, artifact: &[u8]) -> Result<PathBuf> {
        let staging = self.staging_dir(version);
        let target = self.release_dir(version);

        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        if let Err(e) = Self::write_artifact(&staging, artifact_name, artifact) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&staging, &target).map_err(|e| {
            let _ = fs::remove_dir_all(&staging);
            EdgeError::staging(format!("failed to move {} into place: {}", version, e))
        })?;

        log::info!("Staged release {} at {}", version, target.display());
        Ok(target)
    }

    fn is_staged(&self, version: &Version) -> bool {
        self.release_dir(version).is_dir()
    }

    fn activate(&self, version: &Version) -> Result<()> {
        if !self.is_staged(version) {
            return Err(EdgeError::staging(format!(
                "release {} is not staged",
                version
            )));
        }
        write_atomic(&self.pointer_path(), version.to_string().as_bytes())?;
        log::info!("Activated release {}", version);
        Ok(())
    }

    fn clear_active(&self) -> Result<()> {
        let pointer = self.pointer_path();
        if pointer.exists() {
            fs::remove_file(pointer)?;
        }
        Ok(())
    }

    fn active_version(&self) -> Result<Option<Version>> {
        let pointer = self.pointer_path();
        if !pointer.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(pointer)?;
        Ok(Some(text.parse()?))
    }

    fn discard(&self, version: &Version) -> Result<()> {
        let dir = self.release_dir(version);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            log::info!("Discarded release {}", version);
        }
        Ok(())
    }

    fn prune(&self, keep: &[Version]) -> Result<Vec<Version>> {
        let releases = self.releases_dir();
        if !releases.exists() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for entry in fs::read_dir(&releases)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(STAGING_PREFIX) {
                fs::remove_dir_all(entry.path())?;
                continue;
            }
            let Ok(version) = name.parse::<Version>() else {
                continue;
            };
            if !keep.contains(&version) {
                fs::remove_dir_all(entry.path())?;
                removed.push(version);
            }
        }

        removed.sort();
        Ok(removed)
    }
}
