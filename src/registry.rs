/*
 * Owns the per-UUID state. A `ProfileGroup` aggregates every file currently
 * providing a profile for one UUID together with the profile exported to
 * external callers; the `ProfileRegistry` maps UUIDs to groups and keeps a
 * derived filename lookup that is rebuilt wholesale on every rescan rather
 * than patched incrementally.
 */
use crate::hints::HintTarget;
use crate::models::{CandidateFile, FileIdentity, ProfileHandle, StorageTier};
use crate::profile_model::ConnectionProfile;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug)]
pub struct ProfileGroup {
    uuid: Uuid,
    pub(crate) candidates: Vec<CandidateFile>,
    pub(crate) exported: Option<ConnectionProfile>,
    pub(crate) exported_tier: Option<StorageTier>,
    pub(crate) exported_path: Option<PathBuf>,
    // Hint slots live only for the duration of one rescan pass.
    pub(crate) hint_run: Option<HintTarget>,
    pub(crate) hint_etc: Option<HintTarget>,
}

impl ProfileGroup {
    fn new(uuid: Uuid) -> Self {
        ProfileGroup {
            uuid,
            candidates: Vec::new(),
            exported: None,
            exported_tier: None,
            exported_path: None,
            hint_run: None,
            hint_etc: None,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn handle(&self) -> ProfileHandle {
        ProfileHandle::new(self.uuid)
    }

    pub fn exported(&self) -> Option<&ConnectionProfile> {
        self.exported.as_ref()
    }

    pub fn exported_tier(&self) -> Option<StorageTier> {
        self.exported_tier
    }

    pub fn exported_path(&self) -> Option<&Path> {
        self.exported_path.as_deref()
    }

    pub fn candidate_paths(&self) -> impl Iterator<Item = &Path> {
        self.candidates.iter().map(|c| c.full_path.as_path())
    }

    /// An export that has no backing file; rescans never replace it.
    pub fn is_memory_only(&self) -> bool {
        self.exported.is_some() && self.exported_tier == Some(StorageTier::Memory)
    }

    /// A group with nothing to track is deleted immediately by the engine.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.exported.is_none()
    }

    pub(crate) fn record_hint(&mut self, tier: StorageTier, target: HintTarget) {
        match tier {
            StorageTier::Run => self.hint_run = Some(target),
            StorageTier::Etc => self.hint_etc = Some(target),
            _ => {
                log::warn!(
                    "Registry: Ignoring canonical marker for {} from read-only tier {tier}.",
                    self.uuid
                );
            }
        }
    }

    /*
     * Resolves the rescan's hint: when both writable tiers provided one,
     * the higher-ranked run tier wins and the persistent tier's marker is
     * discarded. Clears both slots.
     */
    pub(crate) fn take_hint(&mut self) -> Option<HintTarget> {
        let run = self.hint_run.take();
        let etc = self.hint_etc.take();
        match (run, etc) {
            (Some(run), Some(_)) => {
                log::debug!(
                    "Registry: Canonical marker for {} in the persistent tier is shadowed by \
                     the run tier's marker.",
                    self.uuid
                );
                Some(run)
            }
            (Some(run), None) => Some(run),
            (None, etc) => etc,
        }
    }

    pub(crate) fn sort_candidates(&mut self) {
        self.candidates.sort_by(CandidateFile::priority_cmp);
    }

    /*
     * Promotes the candidate the hint points at to the front, overriding
     * tier and mtime rank. Matching is by device and inode of the hint's
     * resolved target, so a renamed-but-identical file still matches; a
     * dangling target simply fails to promote.
     */
    pub(crate) fn promote_hinted(&mut self, target: &Path) -> bool {
        let target_identity = match FileIdentity::of(target) {
            Ok(identity) => identity,
            Err(e) => {
                log::debug!(
                    "Registry: Canonical marker for {} has unusable target {target:?} ({e}), \
                     ignoring.",
                    self.uuid
                );
                return false;
            }
        };
        match self
            .candidates
            .iter()
            .position(|c| c.identity.same_inode(&target_identity))
        {
            Some(0) => true,
            Some(pos) => {
                let promoted = self.candidates.remove(pos);
                log::debug!(
                    "Registry: Promoting {:?} for {} over tier/mtime rank.",
                    promoted.full_path,
                    self.uuid
                );
                self.candidates.insert(0, promoted);
                true
            }
            None => {
                log::debug!(
                    "Registry: Canonical marker for {} names {target:?}, which is not among \
                     the candidates, ignoring.",
                    self.uuid
                );
                false
            }
        }
    }

    /// Inserts or replaces the candidate entry for `candidate.full_path`.
    pub(crate) fn upsert_candidate(&mut self, candidate: CandidateFile) {
        if let Some(existing) = self
            .candidates
            .iter_mut()
            .find(|c| c.full_path == candidate.full_path)
        {
            *existing = candidate;
        } else {
            self.candidates.push(candidate);
        }
    }
}

pub struct ProfileRegistry {
    // BTreeMap so rescans process groups in a deterministic order.
    groups: BTreeMap<Uuid, ProfileGroup>,
    filename_index: HashMap<PathBuf, Uuid>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        ProfileRegistry {
            groups: BTreeMap::new(),
            filename_index: HashMap::new(),
        }
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&ProfileGroup> {
        self.groups.get(uuid)
    }

    pub(crate) fn get_mut(&mut self, uuid: &Uuid) -> Option<&mut ProfileGroup> {
        self.groups.get_mut(uuid)
    }

    pub(crate) fn ensure(&mut self, uuid: Uuid) -> &mut ProfileGroup {
        self.groups
            .entry(uuid)
            .or_insert_with(|| ProfileGroup::new(uuid))
    }

    pub(crate) fn remove(&mut self, uuid: &Uuid) -> Option<ProfileGroup> {
        let group = self.groups.remove(uuid)?;
        self.filename_index.retain(|_, owner| owner != uuid);
        Some(group)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn uuids(&self) -> Vec<Uuid> {
        self.groups.keys().copied().collect()
    }

    pub fn group_by_filename(&self, path: &Path) -> Option<&ProfileGroup> {
        let uuid = self.filename_index.get(path)?;
        self.groups.get(uuid)
    }

    /*
     * Starts a rescan pass: the filename index is dropped entirely (it is
     * rebuilt from the new candidate set) and every group's candidate list
     * and hint slots are cleared while the exported profile and its
     * identity survive.
     */
    pub(crate) fn begin_rescan(&mut self) {
        self.filename_index.clear();
        for group in self.groups.values_mut() {
            group.candidates.clear();
            group.hint_run = None;
            group.hint_etc = None;
        }
    }

    pub(crate) fn index_filename(&mut self, path: PathBuf, uuid: Uuid) {
        self.filename_index.insert(path, uuid);
    }

    pub(crate) fn unindex_filename(&mut self, path: &Path) {
        self.filename_index.remove(path);
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
