/*
 * Holds the directory configuration for the profile store. The set of
 * directories is an explicit value constructed once by the settings layer
 * and passed into the engine's constructor; nothing in this crate resolves
 * paths lazily or from process-global state.
 *
 * Priority, high to low: one volatile run-time directory, one optional
 * persistent directory, and any number of read-only library directories
 * ranked by configuration order. An explicitly empty persistent setting
 * disables the persistent tier entirely, leaving only the run-time and
 * library tiers active.
 */
use crate::models::StorageTier;
use std::path::{Component, Path, PathBuf};

#[derive(Debug)]
pub enum ClassificationError {
    NotAbsolute(PathBuf),
    OutsideConfiguredDirs(PathBuf),
    RejectedFilename(PathBuf),
}

impl std::fmt::Display for ClassificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassificationError::NotAbsolute(p) => {
                write!(f, "Path is not absolute: {p:?}")
            }
            ClassificationError::OutsideConfiguredDirs(p) => {
                write!(f, "Path is not inside a configured profile directory: {p:?}")
            }
            ClassificationError::RejectedFilename(p) => {
                write!(f, "Filename is not acceptable for its storage tier: {p:?}")
            }
        }
    }
}

impl std::error::Error for ClassificationError {}

#[derive(Debug, Clone)]
pub struct StorageDirectories {
    run_dir: PathBuf,
    etc_dir: Option<PathBuf>,
    lib_dirs: Vec<PathBuf>,
}

impl StorageDirectories {
    /*
     * Builds the directory configuration. `etc_dir` set to an empty path
     * disables the persistent tier. Duplicate directories are dropped so a
     * path always classifies to exactly one tier: a persistent directory
     * equal to the run directory is ignored, as is any library directory
     * equal to either.
     */
    pub fn new(run_dir: PathBuf, etc_dir: Option<PathBuf>, lib_dirs: Vec<PathBuf>) -> Self {
        let run_dir = simplify_path(&run_dir);

        let etc_dir = match etc_dir {
            Some(p) if p.as_os_str().is_empty() => {
                log::debug!(
                    "Config: Persistent directory explicitly disabled; profiles cannot be \
                     persisted across reboots."
                );
                None
            }
            Some(p) => {
                let p = simplify_path(&p);
                if p == run_dir {
                    log::warn!(
                        "Config: Persistent directory {p:?} duplicates the run directory, ignoring."
                    );
                    None
                } else {
                    Some(p)
                }
            }
            None => None,
        };

        let mut seen: Vec<&Path> = vec![run_dir.as_path()];
        if let Some(etc) = &etc_dir {
            seen.push(etc.as_path());
        }
        let mut deduped = Vec::new();
        for dir in lib_dirs {
            let dir = simplify_path(&dir);
            if seen.iter().any(|s| *s == dir.as_path()) || deduped.contains(&dir) {
                log::warn!("Config: Dropping duplicate library directory {dir:?}.");
                continue;
            }
            deduped.push(dir);
        }

        StorageDirectories {
            run_dir,
            etc_dir,
            lib_dirs: deduped,
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn persistent_dir(&self) -> Option<&Path> {
        self.etc_dir.as_deref()
    }

    pub fn lib_dirs(&self) -> &[PathBuf] {
        &self.lib_dirs
    }

    /// Where newly persisted profiles go: the persistent directory, or the
    /// (volatile) run directory when persistence is disabled.
    pub fn write_dir(&self) -> (&Path, StorageTier, u32) {
        match &self.etc_dir {
            Some(etc) => (etc.as_path(), StorageTier::Etc, 1),
            None => (self.run_dir.as_path(), StorageTier::Run, 0),
        }
    }

    /// All directories in rank order, with their tier and numeric priority.
    pub fn scan_order(&self) -> Vec<(u32, StorageTier, &Path)> {
        let mut order = vec![(0, StorageTier::Run, self.run_dir.as_path())];
        if let Some(etc) = &self.etc_dir {
            order.push((1, StorageTier::Etc, etc.as_path()));
        }
        for (i, dir) in self.lib_dirs.iter().enumerate() {
            order.push((2 + i as u32, StorageTier::Lib, dir.as_path()));
        }
        order
    }

    /*
     * Classifies an absolute path by longest-prefix match against the
     * configured directories. Returns the tier, its numeric priority, the
     * matched directory, and the bare filename. Paths nested deeper than
     * one level below a directory are not profile locations.
     */
    pub fn classify(
        &self,
        path: &Path,
    ) -> Result<(StorageTier, u32, &Path, String), ClassificationError> {
        if !path.is_absolute() {
            return Err(ClassificationError::NotAbsolute(path.to_path_buf()));
        }
        let path = simplify_path(path);

        let mut best: Option<(u32, StorageTier, &Path)> = None;
        for (priority, tier, dir) in self.scan_order() {
            if path.starts_with(dir)
                && best.is_none_or(|(_, _, prev)| dir.as_os_str().len() > prev.as_os_str().len())
            {
                best = Some((priority, tier, dir));
            }
        }
        let Some((priority, tier, dir)) = best else {
            return Err(ClassificationError::OutsideConfiguredDirs(path));
        };

        let remainder = path
            .strip_prefix(dir)
            .map_err(|_| ClassificationError::OutsideConfiguredDirs(path.clone()))?;
        let mut components = remainder.components();
        let file_name = match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => name.to_string_lossy().into_owned(),
            _ => return Err(ClassificationError::OutsideConfiguredDirs(path.clone())),
        };

        Ok((tier, priority, dir, file_name))
    }
}

/*
 * Lexically normalizes a path: resolves `.` components and collapses
 * redundant separators without touching the file system (symlinks are left
 * alone on purpose; identity comparisons happen via device and inode).
 */
pub fn simplify_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
