use bitvec::prelude::*;

use super::{MAX_LAST_INODE, ROOT_INODE};

/// In-memory map of used inode numbers, rebuilt from the inode table at mount.
/// Bit `i` is set when inode `i` is in use, inodes below [ROOT_INODE] are
/// always marked used.
#[derive(Debug, Clone)]
pub struct InodeBitmap {
    bits: BitVec<u8, Lsb0>,
    last_inode: u32,
}

impl InodeBitmap {
    /// # Params
    /// - `last_inode`: the largest allocatable inode number, at most [MAX_LAST_INODE]
    pub fn new(last_inode: u32) -> Self {
        let mut bits = BitVec::<u8, Lsb0>::repeat(false, MAX_LAST_INODE as usize + 1);
        bits[..ROOT_INODE as usize].fill(true);
        InodeBitmap { bits, last_inode }
    }

    pub fn last_inode(&self) -> u32 {
        self.last_inode
    }

    /// check if inode is in use
    /// # Params
    /// - `ino`: inode number
    pub fn has_inode(&self, ino: u32) -> bool {
        self.bits
            .get(ino as usize)
            .as_deref()
            .copied()
            .unwrap_or(false)
    }

    /// mark an inode found on disk as used
    pub fn occupy(&mut self, ino: u32) {
        if let Some(mut bit) = self.bits.get_mut(ino as usize) {
            *bit = true;
        }
    }

    /// take the lowest free inode number, `None` when the table is full
    pub fn allocate(&mut self) -> Option<u32> {
        let end = self.last_inode as usize + 1;
        let ino = self.bits[..end.min(self.bits.len())].first_zero()?;
        self.bits.set(ino, true);
        Some(ino as u32)
    }

    /// release inode
    /// # Params
    /// - `ino`: inode number, reserved numbers are never released
    pub fn release(&mut self, ino: u32) {
        if ino < ROOT_INODE {
            return;
        }
        if let Some(mut bit) = self.bits.get_mut(ino as usize) {
            *bit = false;
        }
    }

    /// used inode numbers from the root up to the last inode
    pub fn allocated(&self) -> impl Iterator<Item = u32> + '_ {
        (ROOT_INODE..=self.last_inode).filter(|ino| self.has_inode(*ino))
    }

    /// the bitmap from the last inode down to bit 0, one character per inode
    pub fn dump(&self) -> String {
        (0..=self.last_inode)
            .rev()
            .map(|ino| if self.has_inode(ino) { '1' } else { '0' })
            .collect()
    }
}
