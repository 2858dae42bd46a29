use serde::{Deserialize, Serialize};

use crate::{
    block_store::{BlockStore, WriteBack, BLOCK_SIZE},
    error::{Error, Result},
    utils::{fs_size_calculator, traits::OnDisk},
};

use super::{DIRENT_SIZE, FS_MAGIC};

/// smallest `start` offset: the whole superblock block plus one directory entry
pub const MIN_DATA_START: u32 = (BLOCK_SIZE + DIRENT_SIZE) as u32;

/// The superblock of this filesystem, stored at the head of block 0.
/// The rest of block 0 is zero padding.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SuperBlock {
    /// magic number
    pub magic: u32,
    /// first byte of the data area, one past the inode table
    pub start: u32,
    /// last valid byte of the volume
    pub end: u32,
    /// `from`/`to` other than -1 mean the volume was not shut down cleanly
    pub from: i32,
    pub to: i32,
    pub bfrom: i32,
    pub bto: i32,
    pub fsname: [u8; 6],
    pub volume: [u8; 6],
}

impl OnDisk for SuperBlock {
    const SIZE: usize = 40;
}

fn name_field(name: &str) -> [u8; 6] {
    let mut field = [0u8; 6];
    let bytes = name.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

fn field_to_string(field: &[u8; 6]) -> String {
    let len = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..len]).into_owned()
}

impl SuperBlock {
    pub fn new(start: u32, end: u32, fsname: &str, volume: &str) -> Self {
        Self {
            magic: FS_MAGIC,
            start,
            end,
            from: -1,
            to: -1,
            bfrom: -1,
            bto: -1,
            fsname: name_field(fsname),
            volume: name_field(volume),
        }
    }

    pub fn read_from<S: BlockStore>(store: &S) -> Result<Self> {
        let mut block = [0u8; BLOCK_SIZE];
        store.read_block(0, &mut block)?;
        Self::decode(&block)
    }

    /// rewrite block 0, the padding is zeroed
    pub fn write_to<S: BlockStore>(&self, store: &S, mode: WriteBack) -> Result<()> {
        let mut block = [0u8; BLOCK_SIZE];
        self.encode_into(&mut block)?;
        store.write_block(0, &block)?;
        store.flush_block(0, mode)?;
        Ok(())
    }

    pub fn is_unclean(&self) -> bool {
        self.from != -1 && self.to != -1
    }

    /// check the magic number and the bounds of the data area
    pub fn validate(&self) -> Result<()> {
        if self.magic != FS_MAGIC {
            return Err(Error::BadMagic(self.magic));
        }
        if self.start > self.end {
            return Err(Error::CorruptSuperblock(format!(
                "start {:#x} is past end {:#x}",
                self.start, self.end
            )));
        }
        if self.start < MIN_DATA_START {
            return Err(Error::CorruptSuperblock(format!(
                "start {:#x} leaves no room for the superblock",
                self.start
            )));
        }
        Ok(())
    }

    /// the last inode number the inode table holds
    pub fn last_inode(&self) -> u32 {
        fs_size_calculator::last_inode(self.start)
    }

    /// total blocks of the volume
    pub fn total_blocks(&self) -> u64 {
        (self.end as u64 + 1) / BLOCK_SIZE as u64
    }

    /// blocks of the data area, all free on an empty volume
    pub fn data_blocks(&self) -> u64 {
        (self.end as u64 + 1 - self.start as u64) / BLOCK_SIZE as u64
    }

    /// first block of the data area
    pub fn data_start_block(&self) -> u32 {
        self.start.div_ceil(BLOCK_SIZE as u32)
    }

    pub fn fsname(&self) -> String {
        field_to_string(&self.fsname)
    }

    pub fn volume(&self) -> String {
        field_to_string(&self.volume)
    }
}
