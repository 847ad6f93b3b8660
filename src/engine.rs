/*
 * The reconciliation engine. It owns the registry and is the only writer of
 * it; callers interact through the entry points here, each of which runs to
 * completion without interleaving. `reload_all` merges scans from every
 * tier, resolves one winner per UUID, and diffs against the previously
 * exported state; `load_one` adopts a single explicit file, bypassing
 * tier-priority ranking; `add`, `commit`, and `delete` cover the write
 * paths. Change events go out through the injected `ChangeListener`, with
 * all remove events emitted before any add/update events.
 */
use crate::config::{ClassificationError, StorageDirectories};
use crate::hints::{HintStore, HintTarget};
use crate::models::{CandidateFile, FileIdentity, ProfileHandle, StorageTier};
use crate::profile_model::{ConnectionProfile, ParseError, ProfileModelOperations, WriteError};
use crate::registry::{ProfileGroup, ProfileRegistry};
use crate::scanner::{self, DirectoryScanner};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
pub enum EngineError {
    Classification(ClassificationError),
    Parse(ParseError),
    Write(WriteError),
    Io(io::Error),
    UnknownHandle(Uuid),
    UuidMismatch { handle: Uuid, profile: Uuid },
}

impl From<ClassificationError> for EngineError {
    fn from(err: ClassificationError) -> Self {
        EngineError::Classification(err)
    }
}

impl From<ParseError> for EngineError {
    fn from(err: ParseError) -> Self {
        EngineError::Parse(err)
    }
}

impl From<WriteError> for EngineError {
    fn from(err: WriteError) -> Self {
        EngineError::Write(err)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Classification(e) => write!(f, "Classification error: {e}"),
            EngineError::Parse(e) => write!(f, "Parse error: {e}"),
            EngineError::Write(e) => write!(f, "Write error: {e}"),
            EngineError::Io(e) => write!(f, "I/O error: {e}"),
            EngineError::UnknownHandle(uuid) => {
                write!(f, "No profile group is registered for handle {uuid}")
            }
            EngineError::UuidMismatch { handle, profile } => write!(
                f,
                "Profile UUID {profile} does not match handle UUID {handle}"
            ),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Classification(e) => Some(e),
            EngineError::Parse(e) => Some(e),
            EngineError::Write(e) => Some(e),
            EngineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Receives profile change notifications; removes pass `None`.
pub trait ChangeListener: Send + Sync {
    fn connection_changed(
        &self,
        uuid: &Uuid,
        handle: &ProfileHandle,
        profile: Option<&ConnectionProfile>,
    );
}

// Why a commit happened. A rename to the id-derived filename is only
// allowed for an explicit user action that also changed the id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitReason {
    pub user_action: bool,
    pub id_changed: bool,
}

#[derive(Debug)]
pub struct CommitOutcome {
    pub written_path: PathBuf,
    pub renamed_from: Option<PathBuf>,
    /// Present when on-disk normalization made the stored profile differ
    /// semantically from what the caller asked to commit.
    pub reread: Option<ConnectionProfile>,
    pub description: String,
}

pub struct ReconciliationEngine {
    dirs: StorageDirectories,
    model: Arc<dyn ProfileModelOperations>,
    listener: Arc<dyn ChangeListener>,
    hints: HintStore,
    scanner: DirectoryScanner,
    registry: ProfileRegistry,
}

impl ReconciliationEngine {
    pub fn new(
        dirs: StorageDirectories,
        model: Arc<dyn ProfileModelOperations>,
        listener: Arc<dyn ChangeListener>,
    ) -> Self {
        let hints = HintStore::new(dirs.run_dir().to_path_buf());
        let scanner = DirectoryScanner::new(Arc::clone(&model));
        ReconciliationEngine {
            dirs,
            model,
            listener,
            hints,
            scanner,
            registry: ProfileRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn dirs(&self) -> &StorageDirectories {
        &self.dirs
    }

    /*
     * Full rescan. Clears per-group candidate state and the filename index,
     * merges fresh scans from every tier in rank order, then resolves each
     * group: memory-only exports shadow everything, a valid hint promotes
     * its target over tier/mtime rank, a masked hint suppresses export
     * entirely, and otherwise the sorted winner is exported. Groups left
     * with neither candidates nor an export are dropped.
     */
    pub fn reload_all(&mut self) {
        let scan_order: Vec<(u32, StorageTier, PathBuf)> = self
            .dirs
            .scan_order()
            .into_iter()
            .map(|(priority, tier, dir)| (priority, tier, dir.to_path_buf()))
            .collect();
        log::debug!(
            "Engine: Full rescan across {} directories.",
            scan_order.len()
        );

        self.registry.begin_rescan();
        for (priority, tier, dir) in scan_order {
            let scanned = self.scanner.scan(&dir, tier, priority);
            for candidate in scanned.candidates {
                let Some(uuid) = candidate.profile.as_ref().map(|p| p.uuid) else {
                    continue;
                };
                self.registry.ensure(uuid).candidates.push(candidate);
            }
            for (uuid, target) in scanned.hints {
                self.registry.ensure(uuid).record_hint(tier, target);
            }
        }

        let mut removes: Vec<(Uuid, ProfileHandle)> = Vec::new();
        let mut updates: Vec<Uuid> = Vec::new();
        let mut doomed: Vec<Uuid> = Vec::new();
        let mut index_entries: Vec<(PathBuf, Uuid)> = Vec::new();

        for uuid in self.registry.uuids() {
            let Some(group) = self.registry.get_mut(&uuid) else {
                continue;
            };
            let hint = group.take_hint();
            group.sort_candidates();

            if group.is_memory_only() {
                // The in-memory profile merely shares a UUID with files on
                // disk; reloading those files cannot replace it.
                if matches!(hint, Some(HintTarget::Masked)) {
                    log::debug!(
                        "Engine: Masking of {uuid} is ignored due to the in-memory profile."
                    );
                }
                for candidate in &group.candidates {
                    log::debug!(
                        "Engine: {:?} for {uuid} is shadowed by the in-memory profile.",
                        candidate.full_path
                    );
                }
            } else {
                let mut masked = false;
                match hint {
                    Some(HintTarget::Masked) => masked = true,
                    Some(HintTarget::Path(target)) => {
                        group.promote_hinted(&target);
                    }
                    None => {}
                }

                let winner = if masked {
                    for candidate in &group.candidates {
                        log::debug!(
                            "Engine: {:?} for {uuid} is masked; tracked but not exported.",
                            candidate.full_path
                        );
                    }
                    None
                } else {
                    group.candidates.first_mut().and_then(|best| {
                        best.profile
                            .take()
                            .map(|profile| (best.full_path.clone(), best.tier, profile))
                    })
                };

                match winner {
                    None => {
                        if group.exported.is_some() {
                            log::debug!("Engine: No selectable candidate for {uuid}, unexporting.");
                            removes.push((uuid, group.handle()));
                            group.exported = None;
                            group.exported_tier = None;
                            group.exported_path = None;
                        }
                        if group.candidates.is_empty() {
                            doomed.push(uuid);
                        }
                    }
                    Some((path, tier, profile)) => {
                        for shadowed in group.candidates.iter().skip(1) {
                            log::debug!(
                                "Engine: {:?} for {uuid} is shadowed by {path:?}.",
                                shadowed.full_path
                            );
                        }
                        let modified = match group.exported.as_ref() {
                            Some(prev) => !self.model.profiles_equal(prev, &profile),
                            None => true,
                        };
                        // Identity metadata refreshes even when the payload
                        // is semantically unchanged.
                        group.exported_tier = Some(tier);
                        group.exported_path = Some(path);
                        if modified {
                            group.exported = Some(profile);
                            updates.push(uuid);
                        }
                    }
                }
            }

            // The parsed payloads only serve a purpose while reloading.
            for candidate in group.candidates.iter_mut() {
                candidate.profile = None;
            }
            for candidate in &group.candidates {
                index_entries.push((candidate.full_path.clone(), uuid));
            }
        }

        for uuid in &doomed {
            log::debug!("Engine: Dropping empty group {uuid}.");
            self.registry.remove(uuid);
        }
        for (path, uuid) in index_entries {
            self.registry.index_filename(path, uuid);
        }

        for (uuid, handle) in &removes {
            self.listener.connection_changed(uuid, handle, None);
        }
        for uuid in &updates {
            if let Some(group) = self.registry.get(uuid)
                && let Some(profile) = group.exported()
            {
                self.listener
                    .connection_changed(uuid, &group.handle(), Some(profile));
            }
        }
        log::debug!(
            "Engine: Rescan complete: {} groups, {} removed, {} added/updated.",
            self.registry.len(),
            removes.len(),
            updates.len()
        );
    }

    /*
     * Loads one explicit file, bypassing tier-priority ranking. Unlike a
     * rescan this may replace a memory-only export. The chosen file is
     * persisted as the UUID's canonical hint (best-effort) so the choice
     * survives a restart.
     */
    pub fn load_one(&mut self, path: &Path) -> Result<(ProfileHandle, ConnectionProfile)> {
        let (tier, priority, dir, file_name) = self.dirs.classify(path)?;
        if !scanner::accepts_filename(tier, &file_name) {
            return Err(ClassificationError::RejectedFilename(path.to_path_buf()).into());
        }
        let normalized = dir.join(&file_name);

        let profile = self.model.parse_profile(&normalized)?;
        let identity = FileIdentity::of(&normalized).map_err(ParseError::Io)?;
        let uuid = profile.uuid;

        let group = self.registry.ensure(uuid);
        let had_export = group.exported.is_some();
        let modified = match group.exported.as_ref() {
            Some(prev) => !self.model.profiles_equal(prev, &profile),
            None => true,
        };
        group.exported_tier = Some(tier);
        group.exported_path = Some(normalized.clone());
        group.upsert_candidate(CandidateFile::new(
            normalized.clone(),
            tier,
            priority,
            identity,
            None,
        ));
        let handle = group.handle();
        if modified {
            group.exported = Some(profile.clone());
        }
        self.registry.index_filename(normalized.clone(), uuid);

        if let Err(e) = self.hints.write_target(&uuid, &normalized) {
            log::warn!("Engine: Failed to persist canonical marker for {uuid}: {e}");
        }

        log::debug!(
            "Engine: Loaded {normalized:?} for {uuid} ({}).",
            if !modified {
                "unchanged"
            } else if had_export {
                "updated"
            } else {
                "added"
            }
        );
        if modified {
            self.listener
                .connection_changed(&uuid, &handle, Some(&profile));
        }
        Ok((handle, profile))
    }

    /*
     * Registers a new profile. With `save_to_disk` it is written into the
     * persistent directory (the run directory when persistence is
     * disabled); without, it becomes a memory-only export that no rescan
     * can supersede.
     */
    pub fn add(&mut self, profile: ConnectionProfile, save_to_disk: bool) -> Result<ProfileHandle> {
        let uuid = profile.uuid;
        if save_to_disk {
            let (dir, tier, priority) = {
                let (dir, tier, priority) = self.dirs.write_dir();
                (dir.to_path_buf(), tier, priority)
            };
            let outcome = self.model.write_profile(&profile, None, &dir, false)?;
            let exported = outcome.reread.unwrap_or(profile);
            let identity = FileIdentity::of(&outcome.path).map_err(EngineError::Io)?;

            let group = self.registry.ensure(uuid);
            let modified = match group.exported.as_ref() {
                Some(prev) => !self.model.profiles_equal(prev, &exported),
                None => true,
            };
            group.exported_tier = Some(tier);
            group.exported_path = Some(outcome.path.clone());
            group.upsert_candidate(CandidateFile::new(
                outcome.path.clone(),
                tier,
                priority,
                identity,
                None,
            ));
            let handle = group.handle();
            if modified {
                group.exported = Some(exported.clone());
            }
            self.registry.index_filename(outcome.path.clone(), uuid);

            log::debug!("Engine: Added profile {uuid} at {:?}.", outcome.path);
            if modified {
                self.listener
                    .connection_changed(&uuid, &handle, Some(&exported));
            }
            Ok(handle)
        } else {
            let group = self.registry.ensure(uuid);
            let modified = match group.exported.as_ref() {
                Some(prev) => !self.model.profiles_equal(prev, &profile),
                None => true,
            };
            group.exported_tier = Some(StorageTier::Memory);
            group.exported_path = None;
            let handle = group.handle();
            if modified {
                group.exported = Some(profile.clone());
            }

            log::debug!("Engine: Added in-memory profile {uuid}.");
            if modified {
                self.listener
                    .connection_changed(&uuid, &handle, Some(&profile));
            }
            Ok(handle)
        }
    }

    /*
     * Writes a modified profile back to its originating file when that file
     * is in a writable tier; memory-only and library-tier exports are
     * materialized into the persistent (or run) directory instead. The
     * result reports a rename when the writer had to choose a different
     * filename, and carries a re-read copy when on-disk normalization
     * diverged from the request.
     */
    pub fn commit(
        &mut self,
        handle: &ProfileHandle,
        profile: &ConnectionProfile,
        reason: CommitReason,
    ) -> Result<CommitOutcome> {
        let uuid = handle.uuid();
        let Some(group) = self.registry.get(&uuid) else {
            return Err(EngineError::UnknownHandle(uuid));
        };
        if profile.uuid != uuid {
            return Err(EngineError::UuidMismatch {
                handle: uuid,
                profile: profile.uuid,
            });
        }

        let existing = if group.exported_tier().is_some_and(StorageTier::is_writable) {
            group.exported_path().map(Path::to_path_buf)
        } else {
            None
        };
        let had_export = group.exported.is_some();

        let (write_dir, fallback_tier, fallback_priority) = {
            let (dir, tier, priority) = self.dirs.write_dir();
            (dir.to_path_buf(), tier, priority)
        };
        let target_dir = existing
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or(write_dir);
        let allow_rename = reason.user_action && reason.id_changed;

        let outcome = self
            .model
            .write_profile(profile, existing.as_deref(), &target_dir, allow_rename)?;

        let (tier, priority) = match self.dirs.classify(&outcome.path) {
            Ok((tier, priority, _, _)) => (tier, priority),
            Err(_) => (fallback_tier, fallback_priority),
        };
        let identity = FileIdentity::of(&outcome.path).map_err(EngineError::Io)?;
        let exported = outcome.reread.clone().unwrap_or_else(|| profile.clone());

        let Some(group) = self.registry.get_mut(&uuid) else {
            return Err(EngineError::UnknownHandle(uuid));
        };
        let modified = match group.exported.as_ref() {
            Some(prev) => !self.model.profiles_equal(prev, &exported),
            None => true,
        };
        if let Some(old) = &outcome.renamed_from {
            group.candidates.retain(|c| &c.full_path != old);
        }
        group.exported_tier = Some(tier);
        group.exported_path = Some(outcome.path.clone());
        group.upsert_candidate(CandidateFile::new(
            outcome.path.clone(),
            tier,
            priority,
            identity,
            None,
        ));
        let emit_handle = group.handle();
        if modified {
            group.exported = Some(exported.clone());
        }
        if let Some(old) = &outcome.renamed_from {
            self.registry.unindex_filename(old);
        }
        self.registry.index_filename(outcome.path.clone(), uuid);

        let description = match (&outcome.renamed_from, had_export) {
            (Some(old), _) => format!(
                "update {:?} ({:?}, {uuid}) and rename from {old:?}",
                outcome.path, profile.id
            ),
            (None, false) => format!(
                "update {:?} ({:?}, {uuid}) and persist profile",
                outcome.path, profile.id
            ),
            (None, true) => format!("update {:?} ({:?}, {uuid})", outcome.path, profile.id),
        };
        log::info!("Engine: {description}");

        if modified {
            self.listener
                .connection_changed(&uuid, &emit_handle, Some(&exported));
        }
        Ok(CommitOutcome {
            written_path: outcome.path,
            renamed_from: outcome.renamed_from,
            reread: outcome.reread,
            description,
        })
    }

    /*
     * Removes every tracked file of the UUID that lives in a writable tier
     * and drops the group. Library-tier candidates cannot be unlinked; a
     * masked hint keeps them suppressed across future rescans. On an I/O
     * failure the group is retained so the next rescan reconciles what
     * actually remains on disk.
     */
    pub fn delete(&mut self, handle: &ProfileHandle) -> Result<()> {
        let uuid = handle.uuid();
        let Some(group) = self.registry.get(&uuid) else {
            return Err(EngineError::UnknownHandle(uuid));
        };
        let was_exported = group.exported.is_some();
        let emit_handle = group.handle();
        let mut files: Vec<(PathBuf, StorageTier)> = group
            .candidates
            .iter()
            .map(|c| (c.full_path.clone(), c.tier))
            .collect();
        if let Some(path) = group.exported_path()
            && !files.iter().any(|(p, _)| p == path)
            && let Some(tier) = group.exported_tier()
            && tier != StorageTier::Memory
        {
            files.push((path.to_path_buf(), tier));
        }

        let mut needs_mask = false;
        let mut first_err: Option<io::Error> = None;
        for (path, tier) in &files {
            if !tier.is_writable() {
                log::debug!("Engine: {path:?} is read-only; masking {uuid} instead.");
                needs_mask = true;
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => log::debug!("Engine: Removed {path:?} for {uuid}."),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    log::warn!("Engine: Failed to remove {path:?} for {uuid}: {e}");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_err {
            return Err(EngineError::Io(e));
        }

        if needs_mask {
            if let Err(e) = self.hints.write_masked(&uuid) {
                log::warn!("Engine: Failed to write mask marker for {uuid}: {e}");
            }
        } else if let Err(e) = self.hints.remove(&uuid) {
            log::warn!("Engine: Failed to remove canonical marker for {uuid}: {e}");
        }

        self.registry.remove(&uuid);
        log::debug!("Engine: Deleted profile group {uuid}.");
        if was_exported {
            self.listener.connection_changed(&uuid, &emit_handle, None);
        }
        Ok(())
    }

    /// Resolves a handle to the currently exported profile, if any.
    pub fn exported_profile(&self, handle: &ProfileHandle) -> Option<&ConnectionProfile> {
        self.registry.get(&handle.uuid()).and_then(ProfileGroup::exported)
    }
}
