/*
 * Persists, per UUID, which file was last chosen as canonical so the
 * choice survives daemon restarts. A hint is a tiny plain-text marker file
 * in the run directory whose name is derived from the UUID; its content is
 * either the absolute path of the canonical file or a sentinel meaning
 * "nothing should export this UUID".
 *
 * Everything here is best-effort: writes that fail are logged by the
 * caller and never fail the primary operation, and reads tolerate absent,
 * unreadable, or garbage markers by treating them as "no hint".
 */
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Marker content meaning "this UUID is intentionally not exported".
pub const MASKED_TARGET: &str = "/dev/null";

const MARKER_SUFFIX: &str = ".canonical";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintTarget {
    Path(PathBuf),
    Masked,
}

/*
 * Marker filenames start with a dot so every tier's profile-filename
 * predicate rejects them; the scanner then recognizes them by shape
 * instead of treating them as profile candidates.
 */
pub fn marker_filename(uuid: &Uuid) -> String {
    format!(".{uuid}{MARKER_SUFFIX}")
}

pub fn parse_marker_filename(file_name: &str) -> Option<Uuid> {
    let stem = file_name.strip_prefix('.')?.strip_suffix(MARKER_SUFFIX)?;
    Uuid::parse_str(stem).ok()
}

/*
 * Reads one marker file found during a directory scan. Returns `None` for
 * anything that is not a well-formed marker: wrong name shape, unreadable
 * file, empty content, or a relative target path.
 */
pub fn read_marker(dir: &Path, file_name: &str) -> Option<(Uuid, HintTarget)> {
    let uuid = parse_marker_filename(file_name)?;
    let path = dir.join(file_name);

    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            log::debug!("HintStore: Failed to read marker {path:?}: {e}");
            return None;
        }
    };

    let target = contents.trim();
    if target.is_empty() {
        log::debug!("HintStore: Marker {path:?} is empty, ignoring.");
        return None;
    }
    if target == MASKED_TARGET {
        return Some((uuid, HintTarget::Masked));
    }
    if !target.starts_with('/') {
        log::debug!("HintStore: Marker {path:?} has non-absolute target {target:?}, ignoring.");
        return None;
    }
    Some((uuid, HintTarget::Path(PathBuf::from(target))))
}

pub struct HintStore {
    run_dir: PathBuf,
}

impl HintStore {
    pub fn new(run_dir: PathBuf) -> Self {
        HintStore { run_dir }
    }

    pub fn marker_path(&self, uuid: &Uuid) -> PathBuf {
        self.run_dir.join(marker_filename(uuid))
    }

    /// Records `target` as the canonical file for `uuid`.
    pub fn write_target(&self, uuid: &Uuid, target: &Path) -> io::Result<()> {
        let path = self.marker_path(uuid);
        fs::write(&path, format!("{}\n", target.display()))?;
        log::debug!("HintStore: Marked {target:?} canonical for {uuid} in {path:?}.");
        Ok(())
    }

    /// Records that `uuid` must not be exported even if candidate files exist.
    pub fn write_masked(&self, uuid: &Uuid) -> io::Result<()> {
        let path = self.marker_path(uuid);
        fs::write(&path, format!("{MASKED_TARGET}\n"))?;
        log::debug!("HintStore: Masked {uuid} in {path:?}.");
        Ok(())
    }

    /// Removes the marker for `uuid`; a marker that never existed is fine.
    pub fn remove(&self, uuid: &Uuid) -> io::Result<()> {
        match fs::remove_file(self.marker_path(uuid)) {
            Ok(()) => {
                log::debug!("HintStore: Removed marker for {uuid}.");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_marker_filename_round_trip() {
        let uuid = Uuid::new_v4();
        let name = marker_filename(&uuid);

        assert!(name.starts_with('.'));
        assert_eq!(parse_marker_filename(&name), Some(uuid));
    }

    #[test]
    fn test_parse_marker_filename_rejects_other_names() {
        assert!(parse_marker_filename("wired.conn").is_none());
        assert!(parse_marker_filename(".hidden").is_none());
        assert!(parse_marker_filename(".not-a-uuid.canonical").is_none());
        assert!(parse_marker_filename(&format!("{}.canonical", Uuid::new_v4())).is_none());
    }

    #[test]
    fn test_write_and_read_target() {
        let dir = tempdir().unwrap();
        let store = HintStore::new(dir.path().to_path_buf());
        let uuid = Uuid::new_v4();
        let target = Path::new("/etc/profiles/wired.conn");

        store.write_target(&uuid, target).unwrap();

        let (read_uuid, read_target) =
            read_marker(dir.path(), &marker_filename(&uuid)).expect("marker should parse");
        assert_eq!(read_uuid, uuid);
        assert_eq!(read_target, HintTarget::Path(target.to_path_buf()));
    }

    #[test]
    fn test_write_and_read_masked() {
        let dir = tempdir().unwrap();
        let store = HintStore::new(dir.path().to_path_buf());
        let uuid = Uuid::new_v4();

        store.write_masked(&uuid).unwrap();

        let (_, target) = read_marker(dir.path(), &marker_filename(&uuid)).unwrap();
        assert_eq!(target, HintTarget::Masked);
    }

    #[test]
    fn test_read_marker_tolerates_absent_empty_and_garbage() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let name = marker_filename(&uuid);

        // Absent file.
        assert!(read_marker(dir.path(), &name).is_none());

        // Empty content.
        fs::write(dir.path().join(&name), "").unwrap();
        assert!(read_marker(dir.path(), &name).is_none());

        // Relative target.
        fs::write(dir.path().join(&name), "not/absolute.conn").unwrap();
        assert!(read_marker(dir.path(), &name).is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = HintStore::new(dir.path().to_path_buf());
        let uuid = Uuid::new_v4();

        store.write_target(&uuid, Path::new("/x/y.conn")).unwrap();
        store.remove(&uuid).unwrap();
        assert!(!store.marker_path(&uuid).exists());

        // Removing again is not an error.
        store.remove(&uuid).unwrap();
    }
}
