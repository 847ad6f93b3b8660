/*
 * This module lists one profile directory and classifies every entry.
 * Three outcomes exist for an entry: it parses into a candidate file, it is
 * a hint marker updating the per-UUID canonical-file slot, or it is skipped
 * with a log line. A missing or unreadable directory degrades to an empty
 * result; a scan never aborts because of a single bad entry, and a file
 * that vanishes between listing and parsing counts as a parse failure for
 * that entry only.
 */
use crate::hints::{self, HintTarget};
use crate::models::{CandidateFile, FileIdentity, StorageTier};
use crate::profile_model::{PROFILE_FILE_EXTENSION, ProfileModelOperations};
use glob::Pattern;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/*
 * Filenames that editors, package managers, and sysadmins leave behind.
 * Anything matching is never a profile candidate in any tier; hidden names
 * (the leading-dot pattern) double as the namespace for hint markers.
 */
pub const RESERVED_FILENAME_PATTERNS: &[&str] = &[".*", "*~", "*.bak", "*.tmp", "*.swp", "#*#"];

pub fn is_reserved_filename(file_name: &str) -> bool {
    RESERVED_FILENAME_PATTERNS.iter().any(|p| {
        Pattern::new(p)
            .map(|pattern| pattern.matches(file_name))
            .unwrap_or(false)
    })
}

/*
 * Per-tier filename acceptance: the writable run-time and persistent tiers
 * accept any non-reserved filename, read-only library tiers additionally
 * require the recognized profile extension.
 */
pub fn accepts_filename(tier: StorageTier, file_name: &str) -> bool {
    if file_name.is_empty() || is_reserved_filename(file_name) {
        return false;
    }
    match tier {
        StorageTier::Run | StorageTier::Etc => true,
        StorageTier::Lib => Path::new(file_name)
            .extension()
            .is_some_and(|ext| ext == PROFILE_FILE_EXTENSION),
        StorageTier::Memory => false,
    }
}

/// Everything one directory contributed to a rescan.
#[derive(Debug, Default)]
pub struct ScannedDir {
    pub candidates: Vec<CandidateFile>,
    pub hints: Vec<(Uuid, HintTarget)>,
}

pub struct DirectoryScanner {
    model: Arc<dyn ProfileModelOperations>,
}

impl DirectoryScanner {
    pub fn new(model: Arc<dyn ProfileModelOperations>) -> Self {
        DirectoryScanner { model }
    }

    /*
     * Scans a single directory of the given tier. Hint markers are only
     * honored in the writable tiers; a marker sitting in a read-only
     * library directory is skipped like any other reserved name.
     */
    pub fn scan(&self, dir: &Path, tier: StorageTier, priority: u32) -> ScannedDir {
        let mut result = ScannedDir::default();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Scanner: Directory {dir:?} not readable ({e}), treating as empty.");
                return result;
            }
        };

        for entry_result in entries {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Scanner: Failed to read an entry of {dir:?}: {e}");
                    continue;
                }
            };
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let full_path = dir.join(&file_name);

            if entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                log::trace!("Scanner: Skipping subdirectory {full_path:?}.");
                continue;
            }

            if !accepts_filename(tier, &file_name) {
                if tier.is_writable()
                    && let Some((uuid, target)) = hints::read_marker(dir, &file_name)
                {
                    log::trace!("Scanner: Found canonical marker for {uuid} in {dir:?}.");
                    result.hints.push((uuid, target));
                } else {
                    log::trace!("Scanner: Skipping {full_path:?} due to filename pattern.");
                }
                continue;
            }

            // Take the identity before parsing; if the file vanishes or
            // changes in between, the next rescan settles it.
            let identity = match FileIdentity::of(&full_path) {
                Ok(identity) => identity,
                Err(e) => {
                    log::warn!("Scanner: Failed to stat {full_path:?}: {e}");
                    continue;
                }
            };
            let profile = match self.model.parse_profile(&full_path) {
                Ok(profile) => profile,
                Err(e) => {
                    log::warn!("Scanner: Failed to load profile from {full_path:?}: {e}");
                    continue;
                }
            };

            result.candidates.push(CandidateFile::new(
                full_path,
                tier,
                priority,
                identity,
                Some(profile),
            ));
        }

        log::debug!(
            "Scanner: {dir:?} ({tier}) yielded {} candidates and {} hints.",
            result.candidates.len(),
            result.hints.len()
        );
        result
    }
}
