//! our on-disk filesystem
pub mod directory;
pub mod filekind;
pub mod fs_layout;
pub mod inode;
pub mod inode_bitmap;
pub mod inode_table;
pub mod superblock;
mod fs_api_impl;
pub use directory::*;
pub use filekind::*;
pub use fs_api_impl::*;
pub use fs_layout::*;
pub use inode::*;
pub use inode_bitmap::*;
pub use inode_table::*;
pub use superblock::*;

pub const FS_MAGIC: u32 = 0x1BAD_FAFF;
/// inode numbers below the root are reserved and never allocated
pub const ROOT_INODE: u32 = 2;
pub const INODE_SIZE: usize = 64;
pub const INODES_PER_BLOCK: u32 = 8;
/// largest last inode number the bitmap can describe
pub const MAX_LAST_INODE: u32 = 513;
/// longest name a directory entry can hold
pub const NAME_LEN: usize = 14;
pub const DIRENT_SIZE: usize = 16;
pub const DIRENTS_PER_BLOCK: usize = crate::block_store::BLOCK_SIZE / DIRENT_SIZE;
/// `end_offset` of a file that owns no extent
pub const EMPTY_END_OFFSET: u32 = u32::MAX;
