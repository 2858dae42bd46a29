use log::{debug, warn};

use crate::{
    block_store::{BlockStore, WriteBack, BLOCK_SIZE},
    error::{Error, Result},
    utils::traits::OnDisk,
};

use super::{
    inode::DiskInode, inode_bitmap::InodeBitmap, superblock::SuperBlock, EMPTY_END_OFFSET,
    INODES_PER_BLOCK, INODE_SIZE, ROOT_INODE,
};

/// The inode table: fixed 64-byte records starting at block 1,
/// inode `ROOT_INODE` in the first slot.
#[derive(Debug, Clone, Copy)]
pub struct InodeTable {
    last_inode: u32,
}

/// what the mount scan learned from the inode table
#[derive(Debug)]
pub struct ScanSummary {
    pub bitmap: InodeBitmap,
    pub free_inodes: u64,
    /// blocks owned by used inodes
    pub used_blocks: u64,
    /// highest end block among used inodes, 0 if none owns an extent
    pub last_end_block: u32,
}

impl InodeTable {
    pub fn new(last_inode: u32) -> Self {
        InodeTable { last_inode }
    }

    pub fn last_inode(&self) -> u32 {
        self.last_inode
    }

    pub fn contains(&self, ino: u32) -> bool {
        (ROOT_INODE..=self.last_inode).contains(&ino)
    }

    /// block and byte offset of an inode record
    pub fn position(&self, ino: u32) -> Result<(u64, usize)> {
        if !self.contains(ino) {
            return Err(Error::BadInodeNumber(ino));
        }
        let index = ino - ROOT_INODE;
        let block = 1 + (index / INODES_PER_BLOCK) as u64;
        let offset = (index % INODES_PER_BLOCK) as usize * INODE_SIZE;
        Ok((block, offset))
    }

    pub fn read<S: BlockStore>(&self, store: &S, ino: u32) -> Result<DiskInode> {
        let (block_id, offset) = self.position(ino)?;
        let mut block = [0u8; BLOCK_SIZE];
        store.read_block(block_id, &mut block)?;
        DiskInode::decode(&block[offset..])
    }

    /// read-modify-write of the block holding the record
    pub fn write<S: BlockStore>(
        &self,
        store: &S,
        ino: u32,
        inode: &DiskInode,
        mode: WriteBack,
    ) -> Result<()> {
        let (block_id, offset) = self.position(ino)?;
        let mut block = [0u8; BLOCK_SIZE];
        store.read_block(block_id, &mut block)?;
        inode.encode_into(&mut block[offset..])?;
        store.write_block(block_id, &block)?;
        store.flush_block(block_id, mode)?;
        Ok(())
    }

    /// zero a record, which frees the slot
    pub fn clear<S: BlockStore>(&self, store: &S, ino: u32, mode: WriteBack) -> Result<()> {
        self.write(store, ino, &DiskInode::default(), mode)
    }

    /// Walk every record of the table, check that it lies inside the volume
    /// and rebuild the allocation state from it.
    ///
    /// Table blocks that cannot be read are skipped, their slots count
    /// neither as used nor as free.
    pub fn scan<S: BlockStore>(&self, store: &S, superblock: &SuperBlock) -> Result<ScanSummary> {
        let total_blocks = superblock.total_blocks();
        let mut summary = ScanSummary {
            bitmap: InodeBitmap::new(self.last_inode),
            free_inodes: 0,
            used_blocks: 0,
            last_end_block: 0,
        };

        let mut block = [0u8; BLOCK_SIZE];
        let mut readable = false;
        for ino in ROOT_INODE..=self.last_inode {
            let (block_id, offset) = self.position(ino)?;
            if offset == 0 {
                readable = match store.read_block(block_id, &mut block) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("inode table block {block_id} unreadable, skipping: {e}");
                        false
                    }
                };
            }
            if !readable {
                continue;
            }

            let inode = DiskInode::decode(&block[offset..])?;
            if !fits_volume(&inode, total_blocks, superblock.end) {
                return Err(Error::CorruptInode(ino));
            }
            if inode.is_free() {
                summary.free_inodes += 1;
                continue;
            }
            summary.bitmap.occupy(ino);
            summary.used_blocks += inode.block_count();
            summary.last_end_block = summary.last_end_block.max(inode.end_block);
        }
        debug!(
            "scanned {} inodes: {} free, {} blocks used",
            self.last_inode + 1 - ROOT_INODE,
            summary.free_inodes,
            summary.used_blocks
        );
        Ok(summary)
    }
}

fn fits_volume(inode: &DiskInode, total_blocks: u64, end: u32) -> bool {
    let start_block = inode.start_block as u64;
    let end_block = inode.end_block as u64;
    let end_offset = inode.end_offset as u64;
    !(start_block > total_blocks
        || end_block > total_blocks
        || start_block > end_block
        || (inode.end_offset != EMPTY_END_OFFSET && inode.end_offset > end)
        || start_block * BLOCK_SIZE as u64 > end_offset)
}
