/*
 * Glue between file-system change notifications and the engine. The
 * notification handler never mutates engine state; it only classifies the
 * reported path and latches a pending-rescan flag. The daemon's loop drains
 * the flag at a point where no other operation is in flight and runs a full
 * rescan — there is no incremental per-file update path.
 */
use crate::config::StorageDirectories;
use crate::hints;
use crate::scanner;
use std::path::Path;

pub struct MonitorGlue {
    dirs: StorageDirectories,
    rescan_pending: bool,
}

impl MonitorGlue {
    pub fn new(dirs: StorageDirectories) -> Self {
        MonitorGlue {
            dirs,
            rescan_pending: false,
        }
    }

    /*
     * Reacts to a notification about `path`. Paths outside the configured
     * directories, and names that are neither acceptable profile filenames
     * nor hint markers, are ignored so editor droppings and unrelated churn
     * do not force rescans. Returns whether a rescan is now pending.
     */
    pub fn file_event(&mut self, path: &Path) -> bool {
        match self.dirs.classify(path) {
            Ok((tier, _, _, file_name)) => {
                if scanner::accepts_filename(tier, &file_name)
                    || hints::parse_marker_filename(&file_name).is_some()
                {
                    log::debug!("Monitor: {path:?} changed, scheduling full rescan.");
                    self.rescan_pending = true;
                } else {
                    log::trace!("Monitor: Ignoring change to {path:?} (filename pattern).");
                }
            }
            Err(e) => {
                log::trace!("Monitor: Ignoring change outside profile directories: {e}");
            }
        }
        self.rescan_pending
    }

    /// Consumes the pending flag; the caller runs `reload_all` on `true`.
    pub fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.rescan_pending)
    }
}
