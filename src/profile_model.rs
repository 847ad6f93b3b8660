/*
 * This module is the seam towards the profile object model. The engine
 * never interprets profile content itself; it parses, writes, and compares
 * profiles exclusively through the `ProfileModelOperations` trait defined
 * here. The concrete `CoreProfileModel` stores profiles as JSON documents
 * and takes the set of settings keys that are excluded from change
 * detection as a constructor argument, so the policy of which fields count
 * as "changed" stays with the caller.
 */
use crate::checksum_utils;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension required for profile files in read-only library directories.
pub const PROFILE_FILE_EXTENSION: &str = "conn";

#[derive(Debug)]
pub enum ParseError {
    Io(io::Error),
    Serde(serde_json::Error),
    NotAFile(PathBuf),
}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        ParseError::Io(err)
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::Serde(err)
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Io(e) => write!(f, "I/O error: {e}"),
            ParseError::Serde(e) => write!(f, "Profile deserialization error: {e}"),
            ParseError::NotAFile(p) => write!(f, "Not a regular file: {p:?}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Io(e) => Some(e),
            ParseError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum WriteError {
    Io(io::Error),
    Serde(serde_json::Error),
    InvalidProfileId(String),
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        WriteError::Io(err)
    }
}

impl From<serde_json::Error> for WriteError {
    fn from(err: serde_json::Error) -> Self {
        WriteError::Serde(err)
    }
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::Io(e) => write!(f, "I/O error: {e}"),
            WriteError::Serde(e) => write!(f, "Profile serialization error: {e}"),
            WriteError::InvalidProfileId(id) => write!(f, "Invalid profile id: {id:?}"),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Io(e) => Some(e),
            WriteError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

// Represents one connection profile as the engine sees it: the rename-stable
// UUID, the human-readable id, and an opaque map of settings sections. The
// engine never looks inside `settings`; comparisons go through
// `ProfileModelOperations::profiles_equal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub uuid: Uuid,
    pub id: String,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl ConnectionProfile {
    pub fn new(uuid: Uuid, id: impl Into<String>) -> Self {
        ConnectionProfile {
            uuid,
            id: id.into(),
            settings: BTreeMap::new(),
        }
    }
}

/// Result of writing a profile to disk.
#[derive(Debug)]
pub struct WriteOutcome {
    /// The file the profile now lives in.
    pub path: PathBuf,
    /// Set when the writer had to pick a different filename than before.
    pub renamed_from: Option<PathBuf>,
    /// The profile as re-read from disk, present only when on-disk
    /// normalization made it differ semantically from what was requested.
    pub reread: Option<ConnectionProfile>,
    /// False when the target file already held identical bytes and was
    /// left untouched.
    pub content_changed: bool,
}

pub trait ProfileModelOperations: Send + Sync {
    /// Parses one profile file. The returned profile always carries a UUID.
    fn parse_profile(&self, path: &Path) -> Result<ConnectionProfile, ParseError>;

    /*
     * Writes a profile to disk. When `existing_path` is given the profile is
     * rewritten in place, unless `allow_rename` is set and the id-derived
     * filename differs, in which case the new name is used and the old file
     * removed. Without `existing_path` a fresh file is created in
     * `target_dir`. Writing identical bytes over an existing file is skipped.
     */
    fn write_profile(
        &self,
        profile: &ConnectionProfile,
        existing_path: Option<&Path>,
        target_dir: &Path,
        allow_rename: bool,
    ) -> Result<WriteOutcome, WriteError>;

    /// Semantic equality for change detection. Implementations may ignore
    /// fields that are not relevant (volatile state, certain secrets).
    fn profiles_equal(&self, a: &ConnectionProfile, b: &ConnectionProfile) -> bool;
}

pub fn sanitize_profile_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

pub struct CoreProfileModel {
    /// Settings keys excluded from `profiles_equal`.
    ignored_keys: HashSet<String>,
}

impl CoreProfileModel {
    pub fn new() -> Self {
        CoreProfileModel {
            ignored_keys: HashSet::new(),
        }
    }

    /*
     * Creates a model whose change detection ignores the given settings
     * keys. Which keys belong here (e.g. agent-owned secret sections) is
     * decided by the caller that owns the profile schema.
     */
    pub fn with_ignored_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CoreProfileModel {
            ignored_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    fn filename_for(&self, profile: &ConnectionProfile) -> String {
        let sanitized = sanitize_profile_id(&profile.id);
        let stem = if sanitized.is_empty() {
            profile.uuid.to_string()
        } else {
            sanitized
        };
        format!("{stem}.{PROFILE_FILE_EXTENSION}")
    }
}

impl Default for CoreProfileModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileModelOperations for CoreProfileModel {
    fn parse_profile(&self, path: &Path) -> Result<ConnectionProfile, ParseError> {
        log::trace!("ProfileModel: Parsing profile from {path:?}");
        if !path.is_file() {
            return Err(ParseError::NotAFile(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let profile: ConnectionProfile = serde_json::from_reader(reader)?;
        log::debug!(
            "ProfileModel: Parsed profile {} ({}) from {:?}.",
            profile.uuid,
            profile.id,
            path
        );
        Ok(profile)
    }

    fn write_profile(
        &self,
        profile: &ConnectionProfile,
        existing_path: Option<&Path>,
        target_dir: &Path,
        allow_rename: bool,
    ) -> Result<WriteOutcome, WriteError> {
        if profile.id.trim().is_empty() {
            return Err(WriteError::InvalidProfileId(profile.id.clone()));
        }

        let desired_name = self.filename_for(profile);
        let (target, renamed_from) = match existing_path {
            Some(existing) => {
                let existing_name = existing
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if allow_rename && existing_name != desired_name {
                    let dir = existing.parent().unwrap_or(target_dir);
                    (dir.join(&desired_name), Some(existing.to_path_buf()))
                } else {
                    (existing.to_path_buf(), None)
                }
            }
            None => (target_dir.join(&desired_name), None),
        };

        let bytes = serde_json::to_vec_pretty(profile)?;

        let unchanged = target.is_file()
            && checksum_utils::calculate_sha256_checksum(&target)
                .map(|sum| sum == checksum_utils::checksum_of_bytes(&bytes))
                .unwrap_or(false);
        if unchanged {
            log::debug!("ProfileModel: {target:?} already up to date, skipping write.");
        } else {
            let mut file = File::create(&target)?;
            file.write_all(&bytes)?;
            log::debug!(
                "ProfileModel: Wrote profile {} ({}) to {:?}.",
                profile.uuid,
                profile.id,
                target
            );
        }

        if let Some(old) = &renamed_from
            && old != &target
            && let Err(e) = fs::remove_file(old)
        {
            // The stale file resurfaces as a lower-ranked candidate at the
            // next rescan, so this is not fatal.
            log::warn!("ProfileModel: Failed to remove renamed-away file {old:?}: {e}");
        }

        let reread = match self.parse_profile(&target) {
            Ok(on_disk) => {
                if self.profiles_equal(&on_disk, profile) {
                    None
                } else {
                    log::debug!(
                        "ProfileModel: On-disk profile {} diverges from requested content.",
                        profile.uuid
                    );
                    Some(on_disk)
                }
            }
            Err(e) => {
                log::warn!("ProfileModel: Failed to re-read {target:?} after write: {e}");
                None
            }
        };

        Ok(WriteOutcome {
            path: target,
            renamed_from,
            reread,
            content_changed: !unchanged,
        })
    }

    fn profiles_equal(&self, a: &ConnectionProfile, b: &ConnectionProfile) -> bool {
        if a.uuid != b.uuid || a.id != b.id {
            return false;
        }
        let relevant = |settings: &BTreeMap<String, serde_json::Value>| {
            settings
                .iter()
                .filter(|(k, _)| !self.ignored_keys.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>()
        };
        relevant(&a.settings) == relevant(&b.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_profile(id: &str) -> ConnectionProfile {
        let mut profile = ConnectionProfile::new(Uuid::new_v4(), id);
        profile
            .settings
            .insert("ipv4".to_string(), json!({"method": "auto"}));
        profile
    }

    #[test]
    fn test_write_then_parse_round_trip() {
        let dir = tempdir().unwrap();
        let model = CoreProfileModel::new();
        let profile = sample_profile("Home WiFi");

        let outcome = model
            .write_profile(&profile, None, dir.path(), false)
            .unwrap();
        assert!(outcome.content_changed);
        assert!(outcome.renamed_from.is_none());
        assert!(outcome.reread.is_none());
        assert_eq!(
            outcome.path.file_name().unwrap().to_string_lossy(),
            "HomeWiFi.conn"
        );

        let loaded = model.parse_profile(&outcome.path).unwrap();
        assert_eq!(loaded.uuid, profile.uuid);
        assert_eq!(loaded.id, profile.id);
        assert_eq!(loaded.settings, profile.settings);
    }

    #[test]
    fn test_parse_profile_rejects_malformed_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.conn");
        fs::write(&path, "{ not json").unwrap();

        let model = CoreProfileModel::new();
        assert!(matches!(
            model.parse_profile(&path),
            Err(ParseError::Serde(_))
        ));
    }

    #[test]
    fn test_parse_profile_missing_file() {
        let dir = tempdir().unwrap();
        let model = CoreProfileModel::new();
        let result = model.parse_profile(&dir.path().join("absent.conn"));
        assert!(matches!(result, Err(ParseError::NotAFile(_))));
    }

    #[test]
    fn test_rewrite_identical_content_is_skipped() {
        let dir = tempdir().unwrap();
        let model = CoreProfileModel::new();
        let profile = sample_profile("office");

        let first = model
            .write_profile(&profile, None, dir.path(), false)
            .unwrap();
        let second = model
            .write_profile(&profile, Some(&first.path), dir.path(), false)
            .unwrap();

        assert!(first.content_changed);
        assert!(!second.content_changed);
        assert_eq!(second.path, first.path);
    }

    #[test]
    fn test_rename_on_id_change_when_allowed() {
        let dir = tempdir().unwrap();
        let model = CoreProfileModel::new();
        let mut profile = sample_profile("before");

        let first = model
            .write_profile(&profile, None, dir.path(), false)
            .unwrap();
        profile.id = "after".to_string();

        // Without allow_rename the old filename is kept.
        let kept = model
            .write_profile(&profile, Some(&first.path), dir.path(), false)
            .unwrap();
        assert_eq!(kept.path, first.path);
        assert!(kept.renamed_from.is_none());

        // With allow_rename the file moves to the id-derived name.
        let renamed = model
            .write_profile(&profile, Some(&first.path), dir.path(), true)
            .unwrap();
        assert_eq!(
            renamed.path.file_name().unwrap().to_string_lossy(),
            "after.conn"
        );
        assert_eq!(renamed.renamed_from.as_deref(), Some(first.path.as_path()));
        assert!(!first.path.exists(), "old file should be removed");
        assert!(renamed.path.exists());
    }

    #[test]
    fn test_write_profile_rejects_blank_id() {
        let dir = tempdir().unwrap();
        let model = CoreProfileModel::new();
        let profile = ConnectionProfile::new(Uuid::new_v4(), "   ");
        assert!(matches!(
            model.write_profile(&profile, None, dir.path(), false),
            Err(WriteError::InvalidProfileId(_))
        ));
    }

    #[test]
    fn test_filename_falls_back_to_uuid_for_unsanitizable_id() {
        let dir = tempdir().unwrap();
        let model = CoreProfileModel::new();
        let profile = ConnectionProfile::new(Uuid::new_v4(), "!!!");

        let outcome = model
            .write_profile(&profile, None, dir.path(), false)
            .unwrap();
        assert_eq!(
            outcome.path.file_name().unwrap().to_string_lossy(),
            format!("{}.{}", profile.uuid, PROFILE_FILE_EXTENSION)
        );
    }

    #[test]
    fn test_profiles_equal_ignores_configured_keys() {
        let model = CoreProfileModel::with_ignored_keys(["secrets"]);
        let mut a = sample_profile("net");
        let mut b = a.clone();
        a.settings
            .insert("secrets".to_string(), json!({"psk": "one"}));
        b.settings
            .insert("secrets".to_string(), json!({"psk": "two"}));

        assert!(model.profiles_equal(&a, &b));

        b.settings
            .insert("ipv4".to_string(), json!({"method": "manual"}));
        assert!(!model.profiles_equal(&a, &b));
    }

    #[test]
    fn test_profiles_equal_requires_same_uuid_and_id() {
        let model = CoreProfileModel::new();
        let a = sample_profile("net");
        let mut b = a.clone();
        b.id = "other".to_string();
        assert!(!model.profiles_equal(&a, &b));

        let c = ConnectionProfile::new(Uuid::new_v4(), "net");
        assert!(!model.profiles_equal(&a, &c));
    }

    #[test]
    fn test_sanitize_profile_id_variations() {
        assert_eq!(sanitize_profile_id("Home WiFi 5G"), "HomeWiFi5G");
        assert_eq!(sanitize_profile_id("eth0_static"), "eth0_static");
        assert_eq!(sanitize_profile_id("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_profile_id("!@#$%"), "");
    }
}
