//! Per-session server state: open files and directory-match snapshots.
//!
//! Both tables are keyed by opaque 32-bit addresses the guest supplies
//! (the FCB and FILBUF addresses). They are dictionary keys here, nothing
//! more; reusing a live key frees the prior entry first.

use std::collections::HashMap;
use std::fs::File;

use log::warn;

use crate::ll::proto::FilesInfo;

/// A served open file: the host handle plus the mirrored cursor.
#[derive(Debug)]
pub(crate) struct OpenFile {
    pub(crate) file: File,
    /// Host offset after the last successful seek/read/write; sequential
    /// access skips redundant seeks by comparing against it.
    pub(crate) pos: u64,
}

/// Open-file table, keyed by the guest FCB address.
#[derive(Debug, Default)]
pub(crate) struct OpenFileTable {
    entries: HashMap<u32, OpenFile>,
}

impl OpenFileTable {
    pub(crate) fn insert(&mut self, fcb: u32, file: File) {
        let old = self.entries.insert(fcb, OpenFile { file, pos: 0 });
        if old.is_some() {
            warn!("open-file key {fcb:#010x} reused while live, dropping old handle");
        }
    }

    pub(crate) fn get_mut(&mut self, fcb: u32) -> Option<&mut OpenFile> {
        self.entries.get_mut(&fcb)
    }

    pub(crate) fn remove(&mut self, fcb: u32) -> Option<OpenFile> {
        self.entries.remove(&fcb)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug)]
struct MatchSet {
    entries: Vec<FilesInfo>,
    cursor: usize,
}

/// Directory-enumeration table, keyed by the guest FILBUF address.
#[derive(Debug, Default)]
pub(crate) struct DirMatchTable {
    sets: HashMap<u32, MatchSet>,
}

impl DirMatchTable {
    /// Installs a fresh match snapshot under `filep`, replacing any stale
    /// one left by an abandoned enumeration.
    pub(crate) fn insert(&mut self, filep: u32, entries: Vec<FilesInfo>) {
        let old = self.sets.insert(filep, MatchSet { entries, cursor: 0 });
        if old.is_some() {
            warn!("match key {filep:#010x} reused while active, dropping old snapshot");
        }
    }

    /// Hands out up to `num` entries and frees the snapshot once drained.
    /// `None` when no enumeration is active under this key.
    pub(crate) fn next_batch(&mut self, filep: u32, num: usize) -> Option<Vec<FilesInfo>> {
        let set = self.sets.get_mut(&filep)?;
        let end = set.entries.len().min(set.cursor + num.max(1));
        let batch = set.entries[set.cursor..end].to_vec();
        set.cursor = end;
        if set.cursor == set.entries.len() {
            self.sets.remove(&filep);
        }
        Some(batch)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sets.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::dos::Attributes;
    use crate::dos::DosDate;
    use crate::dos::DosTime;

    use super::*;

    fn info(name: &str) -> FilesInfo {
        FilesInfo::new(
            Attributes::ARCHIVE,
            DosTime(0),
            DosDate(0),
            0,
            name.as_bytes(),
        )
    }

    #[test]
    fn batches_drain_and_free() {
        let mut table = DirMatchTable::default();
        table.insert(0x300, vec![info("A.TXT"), info("B.TXT"), info("C.TXT")]);
        let first = table.next_batch(0x300, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(table.len(), 1);
        let rest = table.next_batch(0x300, 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name_bytes(), b"C.TXT");
        assert_eq!(table.len(), 0, "drained snapshot must be freed");
        assert!(table.next_batch(0x300, 1).is_none());
    }

    #[test]
    fn reuse_replaces_snapshot() {
        let mut table = DirMatchTable::default();
        table.insert(0x300, vec![info("A.TXT"), info("B.TXT")]);
        table.insert(0x300, vec![info("C.TXT")]);
        let batch = table.next_batch(0x300, 8).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name_bytes(), b"C.TXT");
        assert_eq!(table.len(), 0);
    }
}
