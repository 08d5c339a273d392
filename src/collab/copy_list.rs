/*!
 * Copy Lists
 *
 * Per-process variable snapshots exchanged with an external worker on every
 * phase call. The read list flows host -> worker, the write list flows
 * worker -> host. Each list is grouped by the on-wire size of the entry
 * (8, 4, 2, then 1 bytes) so the snapshot stays naturally aligned.
 */

use super::memory::{BbType, BbValue};
use super::Blackboard;
use crate::core::errors::{CollabError, CollabResult};
use crate::core::limits::MAX_MESSAGE_SIZE;
use crate::core::{Pid, Vid};

/// Direction flags of a variable reference
pub mod dir {
    pub const READ: u32 = 0x1;
    pub const WRITE: u32 = 0x2;
    pub const READ_WRITE: u32 = READ | WRITE;
    pub const ADD_COPY_LIST: u32 = 0x1_0000;
    pub const IGNORE_REF_FILTER: u32 = 0x2_0000;
}

/// One referenced variable
#[derive(Debug, Clone, PartialEq)]
pub struct CopyEntry {
    pub vid: Vid,
    /// Address of the variable inside the worker
    pub address: u64,
    /// Type as stored in the blackboard
    pub bb_type: BbType,
    /// Type used inside the snapshot
    pub pipe_type: BbType,
    pub dir: u32,
}

#[derive(Debug, Default, Clone)]
struct SizedLists {
    // index 0 => 8 bytes, 1 => 4, 2 => 2, 3 => 1
    groups: [Vec<CopyEntry>; 4],
    bytes: usize,
}

impl SizedLists {
    fn group_index(ty: BbType) -> usize {
        match ty.size() {
            8 => 0,
            4 => 1,
            2 => 2,
            _ => 3,
        }
    }

    fn insert(&mut self, entry: CopyEntry) {
        self.bytes += entry.pipe_type.size();
        self.groups[Self::group_index(entry.pipe_type)].push(entry);
    }

    fn remove(&mut self, vid: Vid, address: u64) -> bool {
        for group in self.groups.iter_mut() {
            if let Some(pos) = group.iter().position(|e| e.vid == vid && e.address == address) {
                let removed = group.remove(pos);
                self.bytes -= removed.pipe_type.size();
                return true;
            }
        }
        false
    }

    fn iter(&self) -> impl Iterator<Item = &CopyEntry> {
        self.groups.iter().flatten()
    }

    fn clear(&mut self) {
        self.groups.iter_mut().for_each(Vec::clear);
        self.bytes = 0;
    }
}

/// Read and write copy lists of one process
#[derive(Debug, Default, Clone)]
pub struct CopyLists {
    all: Vec<CopyEntry>,
    read: SizedLists,
    write: SizedLists,
}

impl CopyLists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reference; returns `false` when the entry is not copyable
    ///
    /// Either list may use at most half the message buffer; the remainder is
    /// left for virtual network frames.
    pub fn insert(&mut self, entry: CopyEntry) -> CollabResult<bool> {
        if entry.address == 0 || !entry.vid.is_valid() {
            return Ok(false);
        }
        let size = entry.pipe_type.size();
        let limit = MAX_MESSAGE_SIZE / 2;
        if entry.dir & dir::READ != 0 && self.read.bytes + size > limit
            || entry.dir & dir::WRITE != 0 && self.write.bytes + size > limit
        {
            return Err(CollabError::Rejected(format!(
                "copy list full, cannot add variable {}",
                entry.vid
            )));
        }
        if entry.dir & dir::READ != 0 {
            self.read.insert(entry.clone());
        }
        if entry.dir & dir::WRITE != 0 {
            self.write.insert(entry.clone());
        }
        self.all.push(entry);
        Ok(true)
    }

    pub fn remove(&mut self, vid: Vid, address: u64) -> bool {
        let before = self.all.len();
        self.all.retain(|e| !(e.vid == vid && e.address == address));
        self.read.remove(vid, address);
        self.write.remove(vid, address);
        before != self.all.len()
    }

    /// Drop every reference, returning the removed entries
    pub fn clear(&mut self) -> Vec<CopyEntry> {
        self.read.clear();
        self.write.clear();
        std::mem::take(&mut self.all)
    }

    pub fn contains(&self, vid: Vid) -> bool {
        self.all.iter().any(|e| e.vid == vid)
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Size of the host -> worker snapshot
    pub fn read_bytes(&self) -> usize {
        self.read.bytes
    }

    /// Size of the worker -> host snapshot
    pub fn write_bytes(&self) -> usize {
        self.write.bytes
    }

    /// Serialize the read list from the blackboard into `out`
    pub fn snapshot_out(&self, blackboard: &dyn Blackboard, out: &mut Vec<u8>) -> CollabResult<usize> {
        let start = out.len();
        for entry in self.read.iter() {
            let value = blackboard.read(entry.vid)?;
            value.convert(entry.pipe_type).write_le(out);
        }
        Ok(out.len() - start)
    }

    /// Write the worker's snapshot back into the blackboard
    pub fn snapshot_in(&self, pid: Pid, blackboard: &dyn Blackboard, data: &[u8]) -> CollabResult<usize> {
        if data.len() != self.write.bytes {
            return Err(CollabError::Rejected(format!(
                "wrong size of snapshot {} != {}",
                data.len(),
                self.write.bytes
            )));
        }
        let mut pos = 0;
        for entry in self.write.iter() {
            let value = BbValue::read_le(entry.pipe_type, &data[pos..])
                .ok_or_else(|| CollabError::Rejected(format!("snapshot truncated at {}", pos)))?;
            blackboard.write(pid, entry.vid, value.convert(entry.bb_type))?;
            pos += entry.pipe_type.size();
        }
        Ok(pos)
    }
}
