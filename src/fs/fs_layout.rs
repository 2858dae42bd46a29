//! what does our filesystem look like in the memory

use std::collections::HashMap;

use log::{debug, error, info, log_enabled, warn, Level};
use parking_lot::Mutex;

use crate::{
    block_store::{BlockStore, WriteBack, BLOCK_SIZE},
    error::{Error, Result},
    utils::digest,
};

use super::{
    inode::{DiskInode, InodeAttr},
    inode_bitmap::InodeBitmap,
    inode_table::InodeTable,
    superblock::SuperBlock,
    FS_MAGIC, MAX_LAST_INODE, NAME_LEN, ROOT_INODE,
};

/// how a volume is mounted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// reject every mutation with [Error::ReadOnly]
    pub read_only: bool,
    /// flush each metadata block before the operation returns
    pub durable_writes: bool,
    /// do not report a missing filesystem
    pub silent: bool,
    /// owner of newly created files
    pub uid: u32,
    pub gid: u32,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            read_only: false,
            durable_writes: false,
            silent: false,
            uid: users::get_effective_uid(),
            gid: users::get_effective_gid(),
        }
    }
}

/// allocation state, guarded by the mutation lock
#[derive(Debug)]
pub struct MountState {
    pub(super) bitmap: InodeBitmap,
    pub(super) free_blocks: u64,
    pub(super) free_inodes: u64,
    /// end block of the last allocated extent, new extents go after it
    pub(super) last_end_block: u32,
}

#[derive(Debug)]
pub(super) struct CachedInode {
    pub(super) record: DiskInode,
    refs: usize,
}

/// filesystem statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: u32,
    pub blocks: u64,
    pub free_blocks: u64,
    pub available_blocks: u64,
    pub files: u64,
    pub free_files: u64,
    pub fsid: u64,
    pub name_len: u32,
    pub magic: u32,
}

/// A mounted volume.
///
/// It has the following layout:
/// - superblock in block 0
/// - inode table from block 1
/// - file and directory extents up to the end of the volume
///
/// The state lock serializes every mutation, the inode cache has its own
/// lock which is only ever taken after the state lock.
pub struct AuFs<S: BlockStore> {
    pub(super) store: S,
    superblock: SuperBlock,
    pub(super) inode_table: InodeTable,
    total_blocks: u64,
    options: MountOptions,
    fsid: u64,
    pub(super) state: Mutex<MountState>,
    pub(super) cache: Mutex<HashMap<u32, CachedInode>>,
}

impl<S: BlockStore> std::fmt::Debug for AuFs<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuFs")
            .field("superblock", &self.superblock)
            .field("total_blocks", &self.total_blocks)
            .field("options", &self.options)
            .field("fsid", &self.fsid)
            .finish_non_exhaustive()
    }
}

impl<S: BlockStore> AuFs<S> {
    /// Mount the volume held by `store`
    /// # Params
    /// - `store`: the device, something like **/dev/sda1** or an image file
    /// - `options`: see [MountOptions]
    /// # Return
    /// a mounted [AuFs], or the first check the volume failed.
    /// Nothing is written to the store while mounting.
    pub fn mount(store: S, options: MountOptions) -> Result<Self> {
        let superblock = SuperBlock::read_from(&store)?;
        if let Err(e) = superblock.validate() {
            if !options.silent || !matches!(e, Error::BadMagic(_)) {
                error!("{e}");
            }
            return Err(e);
        }
        if superblock.is_unclean() && !options.read_only {
            warn!("volume is unclean, continuing");
        }

        let last_inode = superblock.last_inode();
        if last_inode == MAX_LAST_INODE {
            warn!("filesystem was created with 512 inodes, the real maximum is 511, mounting anyway");
        } else if last_inode > MAX_LAST_INODE {
            error!("impossible last inode number {last_inode} > {MAX_LAST_INODE}");
            return Err(Error::TooManyInodes {
                last: last_inode,
                max: MAX_LAST_INODE,
            });
        }

        let inode_table = InodeTable::new(last_inode);
        let root = inode_table.read(&store, ROOT_INODE)?;
        if !root.is_dir() {
            error!("root inode is not a directory: {root:?}");
            return Err(Error::CorruptInode(ROOT_INODE));
        }

        let total_blocks = superblock.total_blocks();
        let mut last_block = [0u8; BLOCK_SIZE];
        let readable = total_blocks
            .checked_sub(1)
            .map(|last| store.read_block(last, &mut last_block));
        if !matches!(readable, Some(Ok(()))) {
            error!("last block not available: {}", total_blocks.saturating_sub(1));
            return Err(Error::CorruptVolume(format!(
                "volume ends before block {total_blocks}"
            )));
        }

        let summary = inode_table.scan(&store, &superblock)?;
        let state = MountState {
            bitmap: summary.bitmap,
            free_blocks: superblock.data_blocks().saturating_sub(summary.used_blocks),
            free_inodes: summary.free_inodes,
            last_end_block: summary.last_end_block,
        };
        let fsid = digest::fsid(&superblock)?;

        let fs = AuFs {
            store,
            superblock,
            inode_table,
            total_blocks,
            options,
            fsid,
            state: Mutex::new(state),
            cache: Mutex::new(HashMap::new()),
        };
        fs.dump_imap("mount", &fs.state.lock());
        info!(
            "mounted {:?} volume {:?}: {} blocks, inodes 2..={}",
            fs.superblock.fsname(),
            fs.superblock.volume(),
            fs.total_blocks,
            last_inode
        );
        Ok(fs)
    }

    /// flush everything and give the store back
    pub fn unmount(self) -> Result<S> {
        self.sync()?;
        info!("unmounted volume {:?}", self.superblock.volume());
        Ok(self.store)
    }

    /// flush every dirty block synchronously
    pub fn sync(&self) -> Result<()> {
        if self.options.read_only {
            return Ok(());
        }
        let _state = self.state.lock();
        self.store.flush(WriteBack::Sync)?;
        Ok(())
    }

    pub fn statfs(&self) -> StatFs {
        let state = self.state.lock();
        StatFs {
            block_size: BLOCK_SIZE as u32,
            blocks: self.total_blocks,
            free_blocks: state.free_blocks,
            available_blocks: state.free_blocks,
            files: (self.inode_table.last_inode() + 1 - ROOT_INODE) as u64,
            free_files: state.free_inodes,
            fsid: self.fsid,
            name_len: NAME_LEN as u32,
            magic: FS_MAGIC,
        }
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    pub fn fsid(&self) -> u64 {
        self.fsid
    }

    /// take a handle to an inode, reading its record on first use
    pub fn iget(&self, ino: u32) -> Result<InodeRef<'_, S>> {
        if !self.inode_table.contains(ino) {
            return Err(Error::BadInodeNumber(ino));
        }
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.get_mut(&ino) {
            cached.refs += 1;
        } else {
            let record = self.inode_table.read(&self.store, ino)?;
            if record.is_free() {
                return Err(Error::NotFound(format!("inode {ino}")));
            }
            cache.insert(ino, CachedInode { record, refs: 1 });
        }
        Ok(InodeRef { fs: self, ino })
    }

    pub fn root(&self) -> Result<InodeRef<'_, S>> {
        self.iget(ROOT_INODE)
    }

    pub(super) fn write_mode(&self) -> WriteBack {
        if self.options.durable_writes {
            WriteBack::Sync
        } else {
            WriteBack::Deferred
        }
    }

    pub(super) fn check_writable(&self) -> Result<()> {
        if self.options.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    pub(super) fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// the current record of an inode, cached or read from the table
    pub(super) fn read_record(&self, ino: u32) -> Result<DiskInode> {
        if let Some(cached) = self.cache.lock().get(&ino) {
            return Ok(cached.record.clone());
        }
        self.inode_table.read(&self.store, ino)
    }

    /// Change an inode record and write it through to the table.
    /// Nothing is written when `f` fails. An inode nobody holds a handle to
    /// is evicted right away once its link count drops to zero.
    pub(super) fn modify_inode<T, F>(&self, state: &mut MountState, ino: u32, f: F) -> Result<T>
    where
        F: FnOnce(&mut DiskInode) -> Result<T>,
    {
        let mut cache = self.cache.lock();
        let cached = cache.get(&ino).map(|cached| cached.record.clone());
        let was_cached = cached.is_some();
        let mut record = match cached {
            Some(record) => record,
            None => self.inode_table.read(&self.store, ino)?,
        };
        let value = f(&mut record)?;
        self.inode_table
            .write(&self.store, ino, &record, self.write_mode())?;
        if let Some(cached) = cache.get_mut(&ino) {
            cached.record = record.clone();
        }
        drop(cache);

        if !was_cached && record.nlink == 0 {
            self.evict_if_unlinked(state, ino)?;
        }
        Ok(value)
    }

    /// Reclaim an inode with no links that nobody holds a handle to.
    pub(super) fn evict_if_unlinked(&self, state: &mut MountState, ino: u32) -> Result<()> {
        let cache = self.cache.lock();
        if cache.contains_key(&ino) {
            return Ok(());
        }
        let record = self.inode_table.read(&self.store, ino)?;
        if record.nlink != 0 {
            return Ok(());
        }
        self.inode_table.clear(&self.store, ino, self.write_mode())?;
        drop(cache);
        if record.is_free() {
            return Ok(());
        }

        state.free_blocks += record.block_count();
        state.free_inodes += 1;
        state.bitmap.release(ino);
        if record.has_extent() && state.last_end_block == record.end_block {
            state.last_end_block = record.start_block - 1;
        }
        debug!(
            "evicted inode {ino}, {} blocks returned",
            record.block_count()
        );
        self.dump_imap("evict", state);
        Ok(())
    }

    pub(super) fn dump_imap(&self, prefix: &str, state: &MountState) {
        if log_enabled!(Level::Debug) {
            debug!(
                "{prefix}: lasti={:08x} <{}>",
                state.bitmap.last_inode(),
                state.bitmap.dump()
            );
        }
    }
}

/// A counted handle to an in-memory inode.
/// The last handle of an unlinked inode reclaims it on drop.
pub struct InodeRef<'a, S: BlockStore> {
    fs: &'a AuFs<S>,
    ino: u32,
}

impl<'a, S: BlockStore> InodeRef<'a, S> {
    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// the record as it is in the cache
    pub fn record(&self) -> Result<DiskInode> {
        self.fs.read_record(self.ino)
    }

    pub fn attr(&self) -> Result<InodeAttr> {
        Ok(InodeAttr::from_disk(self.ino, &self.record()?))
    }

    pub fn is_dir(&self) -> Result<bool> {
        Ok(self.record()?.is_dir())
    }
}

impl<'a, S: BlockStore> std::fmt::Debug for InodeRef<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InodeRef").field("ino", &self.ino).finish()
    }
}

impl<'a, S: BlockStore> Clone for InodeRef<'a, S> {
    fn clone(&self) -> Self {
        if let Some(cached) = self.fs.cache.lock().get_mut(&self.ino) {
            cached.refs += 1;
        }
        InodeRef {
            fs: self.fs,
            ino: self.ino,
        }
    }
}

impl<'a, S: BlockStore> Drop for InodeRef<'a, S> {
    fn drop(&mut self) {
        let unlinked = {
            let mut cache = self.fs.cache.lock();
            let Some(cached) = cache.get_mut(&self.ino) else {
                return;
            };
            cached.refs -= 1;
            if cached.refs > 0 {
                return;
            }
            cache
                .remove(&self.ino)
                .map(|cached| cached.record.nlink == 0)
                .unwrap_or(false)
        };
        if unlinked {
            let mut state = self.fs.state.lock();
            if let Err(e) = self.fs.evict_if_unlinked(&mut state, self.ino) {
                error!("failed to evict inode {}: {e}", self.ino);
            }
        }
    }
}
