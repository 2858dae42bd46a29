use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::{
    block_store::BLOCK_SIZE,
    utils::{time_util, traits::OnDisk},
};

use super::{
    filekind::{FileKind, VTYPE_DIRECTORY, VTYPE_REGULAR},
    EMPTY_END_OFFSET,
};

/// an inode record as it is stored in the inode table
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskInode {
    /// inode number, 0 marks a free slot
    pub ino: u16,
    pub unused: u16,
    /// first block of the extent, 0 if the file owns none
    pub start_block: u32,
    /// last block of the extent
    pub end_block: u32,
    /// absolute byte offset of the last byte of the file
    pub end_offset: u32,
    pub vtype: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub padding: [u32; 4],
}

impl OnDisk for DiskInode {
    const SIZE: usize = super::INODE_SIZE;
}

impl DiskInode {
    /// an empty regular file with one link and no extent
    pub fn new_regular(ino: u32, mode: u32, uid: u32, gid: u32, now: u32) -> Self {
        let mut inode = DiskInode {
            ino: ino as u16,
            vtype: VTYPE_REGULAR,
            mode,
            uid,
            gid,
            nlink: 1,
            atime: now,
            mtime: now,
            ctime: now,
            ..DiskInode::default()
        };
        inode.set_size(0);
        inode
    }

    /// a directory owning the extent `start_block..=end_block`
    pub fn new_directory(
        ino: u32,
        mode: u32,
        (start_block, end_block): (u32, u32),
        size: u64,
        now: u32,
    ) -> Self {
        let mut inode = DiskInode {
            ino: ino as u16,
            vtype: VTYPE_DIRECTORY,
            mode,
            nlink: 2,
            start_block,
            end_block,
            atime: now,
            mtime: now,
            ctime: now,
            ..DiskInode::default()
        };
        inode.set_size(size);
        inode
    }

    pub fn is_free(&self) -> bool {
        self.ino == 0
    }

    pub fn has_extent(&self) -> bool {
        self.start_block != 0
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_vtype(self.vtype)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    /// file size, derived from the extent and the end offset
    pub fn size(&self) -> u64 {
        if !self.has_extent() {
            return 0;
        }
        (self.end_offset as u64 + 1).saturating_sub(self.start_block as u64 * BLOCK_SIZE as u64)
    }

    /// store `size` as an end offset,
    /// an empty file without extent wraps to [EMPTY_END_OFFSET]
    pub fn set_size(&mut self, size: u64) {
        self.end_offset = (self.start_block as u64 * BLOCK_SIZE as u64 + size).wrapping_sub(1) as u32;
    }

    /// blocks of the extent
    pub fn block_count(&self) -> u64 {
        if !self.has_extent() {
            return 0;
        }
        (self.end_block as u64 + 1).saturating_sub(self.start_block as u64)
    }

    /// bytes the extent can hold
    pub fn capacity(&self) -> u64 {
        self.block_count() * BLOCK_SIZE as u64
    }

    pub fn has_empty_sentinel(&self) -> bool {
        self.end_offset == EMPTY_END_OFFSET
    }
}

/// attributes of an inode, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeAttr {
    pub ino: u32,
    pub kind: FileKind,
    /// permission bits with the `S_IFMT` bits of [InodeAttr::kind]
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl InodeAttr {
    pub fn from_disk(ino: u32, inode: &DiskInode) -> Self {
        let kind = inode.kind();
        InodeAttr {
            ino,
            kind,
            mode: (inode.mode & 0xFFFF) | kind.mode_bits(),
            uid: inode.uid,
            gid: inode.gid,
            nlink: inode.nlink,
            size: inode.size(),
            blocks: inode.block_count(),
            atime: time_util::to_system_time(inode.atime),
            mtime: time_util::to_system_time(inode.mtime),
            ctime: time_util::to_system_time(inode.ctime),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_64_bytes() {
        let inode = DiskInode::new_regular(3, 0o644, 1000, 100, 42);
        let mut buf = [0u8; 80];
        inode.encode_into(&mut buf).unwrap();
        assert_eq!(&buf[0..2], &3u16.to_le_bytes());
        // vtype sits after ino, unused, start, end and end offset
        assert_eq!(&buf[16..20], &VTYPE_REGULAR.to_le_bytes());
        assert_eq!(&buf[36..40], &1u32.to_le_bytes());
        assert!(buf[64..].iter().all(|b| *b == 0));
        assert_eq!(DiskInode::decode(&buf).unwrap(), inode);
    }

    #[test]
    fn test_empty_file_stores_the_sentinel() {
        let inode = DiskInode::new_regular(3, 0o644, 0, 0, 0);
        assert!(!inode.has_extent());
        assert!(inode.has_empty_sentinel());
        assert_eq!(inode.size(), 0);
        assert_eq!(inode.block_count(), 0);
    }

    #[test]
    fn test_size_is_derived_from_the_extent() {
        let mut inode = DiskInode::new_regular(4, 0o644, 0, 0, 0);
        inode.start_block = 10;
        inode.end_block = 12;
        inode.set_size(700);
        assert_eq!(inode.end_offset, 10 * 512 + 699);
        assert_eq!(inode.size(), 700);
        assert_eq!(inode.block_count(), 3);
        assert_eq!(inode.capacity(), 3 * 512);

        // a directory extent with nothing in it yet
        inode.set_size(0);
        assert_eq!(inode.end_offset, 10 * 512 - 1);
        assert_eq!(inode.size(), 0);
    }

    #[test]
    fn test_attr_adds_type_bits() {
        let dir = DiskInode::new_directory(2, 0o755, (5, 5), 32, 1_000);
        let attr = InodeAttr::from_disk(2, &dir);
        assert!(attr.is_dir());
        assert_eq!(attr.mode, libc::S_IFDIR as u32 | 0o755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 32);
        assert_eq!(attr.blocks, 1);
        assert_eq!(attr.mtime, time_util::to_system_time(1_000));
    }
}
