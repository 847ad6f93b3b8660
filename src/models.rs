use crate::profile_model::ConnectionProfile;
use std::cmp::Ordering;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

// Priority class of a storage location. `Memory` never appears on a scanned
// candidate; it marks an exported profile that has no backing file at all.
// Disk tiers are ranked by the numeric priority carried on each candidate
// (run = 0, etc = 1, library directories from 2 upwards), not by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    Memory,
    Run,
    Etc,
    Lib,
}

impl StorageTier {
    /// True for tiers whose files the engine may create, rewrite, or unlink.
    pub fn is_writable(self) -> bool {
        matches!(self, StorageTier::Run | StorageTier::Etc)
    }
}

impl std::fmt::Display for StorageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageTier::Memory => write!(f, "memory"),
            StorageTier::Run => write!(f, "run"),
            StorageTier::Etc => write!(f, "etc"),
            StorageTier::Lib => write!(f, "lib"),
        }
    }
}

// Identity of an on-disk file at the moment it was scanned. The (dev, ino)
// pair survives renames, which is what hint matching relies on; mtime feeds
// the tie-break ordering and detects concurrent rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
    pub mtime: SystemTime,
}

impl FileIdentity {
    pub fn of(path: &Path) -> io::Result<FileIdentity> {
        let metadata = std::fs::metadata(path)?;
        Ok(FileIdentity {
            dev: metadata.dev(),
            ino: metadata.ino(),
            mtime: metadata.modified()?,
        })
    }

    /// Same underlying file, regardless of the path it was reached through.
    pub fn same_inode(&self, other: &FileIdentity) -> bool {
        self.dev == other.dev && self.ino == other.ino
    }
}

// One on-disk file offering a profile for some UUID. The parsed payload is
// only held while a scan is in flight; once a winner is chosen the payload
// is dropped and only the file bookkeeping remains.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub full_path: PathBuf,
    pub file_name: String,
    pub tier: StorageTier,
    pub priority: u32,
    pub identity: FileIdentity,
    pub profile: Option<ConnectionProfile>,
}

impl CandidateFile {
    pub fn new(
        full_path: PathBuf,
        tier: StorageTier,
        priority: u32,
        identity: FileIdentity,
        profile: Option<ConnectionProfile>,
    ) -> Self {
        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        CandidateFile {
            full_path,
            file_name,
            tier,
            priority,
            identity,
            profile,
        }
    }

    /*
     * Total order over candidates of one UUID: most important first.
     * Lower tier priority wins; within a tier newer files win; within equal
     * mtime the lexicographically greater filename wins. Two files in the
     * same directory cannot share a name, so the order is total.
     */
    pub fn priority_cmp(a: &CandidateFile, b: &CandidateFile) -> Ordering {
        let ord = a
            .priority
            .cmp(&b.priority)
            .then_with(|| b.identity.mtime.cmp(&a.identity.mtime))
            .then_with(|| b.file_name.cmp(&a.file_name));
        debug_assert!(
            ord != Ordering::Equal || a.full_path == b.full_path,
            "candidate ordering must be total: {:?} vs {:?}",
            a.full_path,
            b.full_path
        );
        ord
    }
}

// Opaque per-UUID handle given out to external callers. It deliberately
// holds nothing but the UUID; the owning group is always resolved by
// registry lookup so a deleted group can never leave a dangling reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileHandle {
    uuid: Uuid,
}

impl ProfileHandle {
    pub fn new(uuid: Uuid) -> Self {
        ProfileHandle { uuid }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}
