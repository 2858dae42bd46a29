use std::io;

use parking_lot::Mutex;

use crate::{
    block_store::{Block, BlockStore, MemoryBlockStore, WriteBack},
    fs::{AuFs, MountOptions},
    mkfs::{format, MkfsOptions},
};

pub const TEST_UID: u32 = 1000;
pub const TEST_GID: u32 = 100;

/// a freshly formatted in-memory volume
pub fn fresh_image(inode_count: u32, blocks: u64) -> MemoryBlockStore {
    let store = MemoryBlockStore::new(blocks);
    let options = MkfsOptions {
        inode_count,
        uid: TEST_UID,
        gid: TEST_GID,
        ..MkfsOptions::default()
    };
    format(&store, &options, &[]).expect("Failed to format test volume");
    store
}

pub fn test_mount_options() -> MountOptions {
    MountOptions {
        uid: TEST_UID,
        gid: TEST_GID,
        ..MountOptions::default()
    }
}

/// format and mount an in-memory volume
pub fn init_test_environment(inode_count: u32, blocks: u64) -> AuFs<MemoryBlockStore> {
    AuFs::mount(fresh_image(inode_count, blocks), test_mount_options())
        .expect("Failed to mount test volume")
}

/// A store whose writes to one block fail once,
/// after `skip` earlier writes to that block went through.
pub struct FailingStore {
    pub inner: MemoryBlockStore,
    block: u64,
    skip: Mutex<Option<u32>>,
}

impl FailingStore {
    pub fn new(inner: MemoryBlockStore, block: u64, skip: u32) -> Self {
        FailingStore {
            inner,
            block,
            skip: Mutex::new(Some(skip)),
        }
    }
}

impl BlockStore for FailingStore {
    fn block_count(&self) -> u64 {
        self.inner.block_count()
    }

    fn read_block(&self, index: u64, buf: &mut Block) -> io::Result<()> {
        self.inner.read_block(index, buf)
    }

    fn write_block(&self, index: u64, buf: &Block) -> io::Result<()> {
        if index == self.block {
            let mut skip = self.skip.lock();
            match *skip {
                Some(0) => {
                    *skip = None;
                    return Err(io::Error::other("bad sector"));
                }
                Some(n) => *skip = Some(n - 1),
                None => {}
            }
        }
        self.inner.write_block(index, buf)
    }

    fn flush_block(&self, index: u64, mode: WriteBack) -> io::Result<()> {
        self.inner.flush_block(index, mode)
    }

    fn flush(&self, mode: WriteBack) -> io::Result<()> {
        self.inner.flush(mode)
    }
}
