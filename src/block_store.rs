//! the block store the filesystem engine reads and writes through
//!
//! The engine only ever moves whole [BLOCK_SIZE] blocks. A block written with
//! [BlockStore::write_block] is immediately visible to later reads on the same
//! store; whether it already reached stable storage is decided by the
//! [WriteBack] mode passed to the flush calls.
use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::{Mutex, RwLock};

pub const BLOCK_SIZE_BITS: u32 = 9;
/// block size of the on-disk format
pub const BLOCK_SIZE: usize = 1 << BLOCK_SIZE_BITS;

pub type Block = [u8; BLOCK_SIZE];

/// how eagerly dirty blocks are written back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteBack {
    /// schedule the write-back and return
    #[default]
    Deferred,
    /// return only after the data reached the device
    Sync,
}

pub trait BlockStore: Send + Sync {
    /// number of whole blocks the store holds
    fn block_count(&self) -> u64;

    fn read_block(&self, index: u64, buf: &mut Block) -> io::Result<()>;

    /// overwrite a block, marking it dirty
    fn write_block(&self, index: u64, buf: &Block) -> io::Result<()>;

    /// write back one dirty block
    fn flush_block(&self, index: u64, mode: WriteBack) -> io::Result<()>;

    /// write back every dirty block
    fn flush(&self, mode: WriteBack) -> io::Result<()>;
}

fn out_of_range(index: u64, count: u64) -> io::Error {
    io::Error::new(
        ErrorKind::UnexpectedEof,
        format!("block {index} is beyond the end of the store ({count} blocks)"),
    )
}

#[inline]
fn block_range(index: u64, count: u64) -> io::Result<std::ops::Range<usize>> {
    if index >= count {
        return Err(out_of_range(index, count));
    }
    let start = index as usize * BLOCK_SIZE;
    Ok(start..start + BLOCK_SIZE)
}

/// a block store backed by a memory mapped image file
#[derive(Debug)]
pub struct MmapBlockStore {
    map: RwLock<MmapMut>,
    block_count: u64,
}

impl MmapBlockStore {
    /// map an image file
    /// # Params
    /// - `image_path`: the path of the image file,\
    /// something like `Block Device`,like **/dev/sda1**
    /// - `read_only`: map the file privately, writes never reach the file
    pub fn open<P>(image_path: P, read_only: bool) -> io::Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(image_path.as_ref())?;
        Self::from_file(&file, read_only)
    }

    pub fn from_file(file: &File, read_only: bool) -> io::Result<Self> {
        // Safety
        // The mapping stays valid as long as no other process truncates the
        // image file, the engine assumes exclusive access to its volume.
        // from https://docs.rs/memmap2/0.5.10/memmap2/struct.MmapMut.html
        let map = unsafe {
            if read_only {
                MmapOptions::new().map_copy(file)?
            } else {
                MmapMut::map_mut(file)?
            }
        };
        let block_count = (map.len() / BLOCK_SIZE) as u64;
        Ok(Self {
            map: RwLock::new(map),
            block_count,
        })
    }
}

impl BlockStore for MmapBlockStore {
    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&self, index: u64, buf: &mut Block) -> io::Result<()> {
        let range = block_range(index, self.block_count)?;
        buf.copy_from_slice(&self.map.read()[range]);
        Ok(())
    }

    fn write_block(&self, index: u64, buf: &Block) -> io::Result<()> {
        let range = block_range(index, self.block_count)?;
        self.map.write()[range].copy_from_slice(buf);
        Ok(())
    }

    fn flush_block(&self, index: u64, mode: WriteBack) -> io::Result<()> {
        let range = block_range(index, self.block_count)?;
        let map = self.map.read();
        match mode {
            WriteBack::Sync => map.flush_range(range.start, BLOCK_SIZE),
            WriteBack::Deferred => map.flush_async_range(range.start, BLOCK_SIZE),
        }
    }

    fn flush(&self, mode: WriteBack) -> io::Result<()> {
        let map = self.map.read();
        match mode {
            WriteBack::Sync => map.flush(),
            WriteBack::Deferred => map.flush_async(),
        }
    }
}

/// a block store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    data: Mutex<Vec<u8>>,
    sync_flushes: AtomicU64,
}

impl MemoryBlockStore {
    /// a zero filled store of `blocks` blocks
    pub fn new(blocks: u64) -> Self {
        Self::from_bytes(vec![0u8; blocks as usize * BLOCK_SIZE])
    }

    /// wrap an image, a trailing partial block is not addressable
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
            sync_flushes: AtomicU64::new(0),
        }
    }

    /// copy of the whole image
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// how many synchronous flushes were requested so far
    pub fn sync_flushes(&self) -> u64 {
        self.sync_flushes.load(Ordering::Relaxed)
    }
}

impl BlockStore for MemoryBlockStore {
    fn block_count(&self) -> u64 {
        (self.data.lock().len() / BLOCK_SIZE) as u64
    }

    fn read_block(&self, index: u64, buf: &mut Block) -> io::Result<()> {
        let data = self.data.lock();
        let range = block_range(index, (data.len() / BLOCK_SIZE) as u64)?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write_block(&self, index: u64, buf: &Block) -> io::Result<()> {
        let mut data = self.data.lock();
        let range = block_range(index, (data.len() / BLOCK_SIZE) as u64)?;
        data[range].copy_from_slice(buf);
        Ok(())
    }

    fn flush_block(&self, index: u64, mode: WriteBack) -> io::Result<()> {
        block_range(index, self.block_count())?;
        if mode == WriteBack::Sync {
            self.sync_flushes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn flush(&self, mode: WriteBack) -> io::Result<()> {
        if mode == WriteBack::Sync {
            self.sync_flushes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
