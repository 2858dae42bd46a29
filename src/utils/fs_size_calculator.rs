//! This module contains functions to calculate the size of different fs components

use crate::{
    block_store::BLOCK_SIZE,
    fs::{INODES_PER_BLOCK, ROOT_INODE},
};

/// calculate needed Inode Table size in blocks
/// # Arguments
/// - `inode_count`: the number of inodes
/// # Example
/// ```
/// use aufs::utils::fs_size_calculator::inode_table_blocks;
/// assert_eq!(inode_table_blocks(1), 1);
/// assert_eq!(inode_table_blocks(8), 1);
/// assert_eq!(inode_table_blocks(9), 2);
/// ```
pub const fn inode_table_blocks(inode_count: u32) -> u32 {
    inode_count.div_ceil(INODES_PER_BLOCK)
}

/// first block of the data area: superblock + inode table
/// # Example
/// ```
/// use aufs::utils::fs_size_calculator::data_start_block;
/// assert_eq!(data_start_block(64), 9);
/// ```
pub const fn data_start_block(inode_count: u32) -> u32 {
    1 + inode_table_blocks(inode_count)
}

/// the superblock's `start` field for a given inode count
/// # Example
/// ```
/// use aufs::utils::fs_size_calculator::data_start_offset;
/// assert_eq!(data_start_offset(64), 9 * 512);
/// ```
pub const fn data_start_offset(inode_count: u32) -> u32 {
    data_start_block(inode_count) * BLOCK_SIZE as u32
}

/// the last usable inode number a superblock `start` offset describes
/// # Example
/// ```
/// use aufs::utils::fs_size_calculator::last_inode;
/// // one inode table block holds inodes 2..=9
/// assert_eq!(last_inode(2 * 512), 9);
/// ```
pub const fn last_inode(start: u32) -> u32 {
    (start - BLOCK_SIZE as u32) / crate::fs::INODE_SIZE as u32 + ROOT_INODE - 1
}

/// number of blocks needed to hold `bytes`
pub const fn blocks_for(bytes: u64) -> u64 {
    bytes.div_ceil(BLOCK_SIZE as u64)
}

/// smallest image (in bytes) holding the inode table and a root directory
pub const fn min_image_size(inode_count: u32, root_dir_blocks: u32) -> u64 {
    (data_start_block(inode_count) + root_dir_blocks) as u64 * BLOCK_SIZE as u64
}
