use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    block_store::{BlockStore, WriteBack, BLOCK_SIZE},
    error::{Error, Result},
    utils::traits::OnDisk,
};

use super::{inode::DiskInode, DIRENT_SIZE, NAME_LEN};

/// a directory entry, 16 bytes inside a directory's extent
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    /// inode number, 0 marks a free slot
    pub ino: u16,
    /// NUL padded, no terminator when all 14 bytes are used
    pub name: [u8; NAME_LEN],
}

impl OnDisk for DirEntry {
    const SIZE: usize = DIRENT_SIZE;
}

impl DirEntry {
    /// the caller checks `name` with [check_name] first
    pub fn new(ino: u32, name: &[u8]) -> Self {
        let mut field = [0u8; NAME_LEN];
        let len = name.len().min(NAME_LEN);
        field[..len].copy_from_slice(&name[..len]);
        DirEntry {
            ino: ino as u16,
            name: field,
        }
    }

    pub fn is_free(&self) -> bool {
        self.ino == 0
    }

    /// stored name without the padding
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(NAME_LEN);
        &self.name[..len]
    }

    /// A shorter name only matches when the stored name ends right after it,
    /// a 14-byte name matches on all of its bytes.
    pub fn matches(&self, name: &[u8]) -> bool {
        let len = name.len();
        if len > NAME_LEN {
            return false;
        }
        if len < NAME_LEN && self.name[len] != 0 {
            return false;
        }
        self.name[..len] == *name
    }
}

/// where an entry lives: block number and byte offset inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub block: u64,
    pub offset: usize,
}

/// reject names a directory entry cannot hold
pub fn check_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("empty file name".into()));
    }
    if name.len() > NAME_LEN {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/// Reads and rewrites the entries stored in directory extents.
/// Callers hold the mutation lock.
pub struct DirectoryStore<'a, S: BlockStore> {
    store: &'a S,
    mode: WriteBack,
}

impl<'a, S: BlockStore> DirectoryStore<'a, S> {
    pub fn new(store: &'a S, mode: WriteBack) -> Self {
        DirectoryStore { store, mode }
    }

    /// Linear scan of the directory up to its size.
    /// Blocks that cannot be read are skipped.
    pub fn find(&self, dir: &DiskInode, name: &[u8]) -> Result<Option<(EntryLocation, DirEntry)>> {
        if name.len() > NAME_LEN {
            return Err(Error::NameTooLong);
        }
        let mut found = None;
        self.walk(dir, |location, entry| {
            if !entry.is_free() && entry.matches(name) {
                found = Some((location, entry));
                return false;
            }
            true
        })?;
        Ok(found)
    }

    /// used entries, in on-disk order
    pub fn entries(&self, dir: &DiskInode) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        self.walk(dir, |_, entry| {
            if !entry.is_free() {
                entries.push(entry);
            }
            true
        })?;
        Ok(entries)
    }

    /// Put `name -> ino` into the first free slot of the extent.
    /// A slot at or past the directory size grows the size by one entry.
    /// `dir` is updated in memory, writing it back is up to the caller.
    pub fn insert(
        &self,
        dir: &mut DiskInode,
        name: &[u8],
        ino: u32,
        now: u32,
    ) -> Result<EntryLocation> {
        check_name(name)?;
        if !dir.has_extent() {
            return Err(Error::NoSpaceInDirectory);
        }

        let mut block = [0u8; BLOCK_SIZE];
        for block_id in dir.start_block..=dir.end_block {
            self.store.read_block(block_id as u64, &mut block)?;
            for offset in (0..BLOCK_SIZE).step_by(DIRENT_SIZE) {
                let entry = DirEntry::decode(&block[offset..])?;
                if !entry.is_free() {
                    continue;
                }
                let pos = (block_id - dir.start_block) as u64 * BLOCK_SIZE as u64 + offset as u64;
                if pos >= dir.size() {
                    let size = dir.size() + DIRENT_SIZE as u64;
                    dir.set_size(size);
                    dir.ctime = now;
                }
                dir.mtime = now;

                DirEntry::new(ino, name).encode_into(&mut block[offset..])?;
                self.store.write_block(block_id as u64, &block)?;
                self.store.flush_block(block_id as u64, self.mode)?;
                debug!(
                    "entry {:?} -> {ino} at block {block_id} offset {offset}",
                    String::from_utf8_lossy(name)
                );
                return Ok(EntryLocation {
                    block: block_id as u64,
                    offset,
                });
            }
        }
        Err(Error::NoSpaceInDirectory)
    }

    /// free the slot, the directory size is left alone
    pub fn remove(&self, location: EntryLocation) -> Result<()> {
        self.rewrite_ino(location, 0)
    }

    /// point an existing entry to another inode
    pub fn replace(&self, location: EntryLocation, ino: u32) -> Result<()> {
        self.rewrite_ino(location, ino)
    }

    fn rewrite_ino(&self, location: EntryLocation, ino: u32) -> Result<()> {
        let mut block = [0u8; BLOCK_SIZE];
        self.store.read_block(location.block, &mut block)?;
        let mut entry = DirEntry::decode(&block[location.offset..])?;
        entry.ino = ino as u16;
        entry.encode_into(&mut block[location.offset..])?;
        self.store.write_block(location.block, &block)?;
        self.store.flush_block(location.block, self.mode)?;
        Ok(())
    }

    /// visit every slot below the directory size until `f` returns false
    fn walk<F>(&self, dir: &DiskInode, mut f: F) -> Result<()>
    where
        F: FnMut(EntryLocation, DirEntry) -> bool,
    {
        let size = dir.size();
        let mut block = [0u8; BLOCK_SIZE];
        let mut pos = 0u64;
        while pos < size {
            let block_id = dir.start_block as u64 + pos / BLOCK_SIZE as u64;
            if let Err(e) = self.store.read_block(block_id, &mut block) {
                warn!("directory block {block_id} unreadable, skipping: {e}");
                pos = (pos / BLOCK_SIZE as u64 + 1) * BLOCK_SIZE as u64;
                continue;
            }
            let mut offset = (pos % BLOCK_SIZE as u64) as usize;
            while offset < BLOCK_SIZE && pos < size {
                let entry = DirEntry::decode(&block[offset..])?;
                let location = EntryLocation {
                    block: block_id,
                    offset,
                };
                if !f(location, entry) {
                    return Ok(());
                }
                offset += DIRENT_SIZE;
                pos += DIRENT_SIZE as u64;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::MemoryBlockStore;

    fn directory(blocks: u32) -> DiskInode {
        DiskInode::new_directory(2, 0o755, (4, 3 + blocks), 0, 0)
    }

    #[test]
    fn test_name_comparison() {
        let entry = DirEntry::new(3, b"foo");
        assert!(entry.matches(b"foo"));
        assert!(!entry.matches(b"fo"));
        assert!(!entry.matches(b"foob"));
        assert_eq!(entry.name(), b"foo");

        let full = DirEntry::new(4, b"abcdefghijklmn");
        assert!(full.matches(b"abcdefghijklmn"));
        assert!(!full.matches(b"abcdefghijklm"));
        assert_eq!(full.name().len(), NAME_LEN);
    }

    #[test]
    fn test_check_name() {
        assert!(matches!(check_name(b""), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            check_name(b"abcdefghijklmno"),
            Err(Error::NameTooLong)
        ));
        assert!(check_name(b"abcdefghijklmn").is_ok());
    }

    #[test]
    fn test_insert_grows_size_and_find() {
        let store = MemoryBlockStore::new(8);
        let entries = DirectoryStore::new(&store, WriteBack::Deferred);
        let mut dir = directory(1);

        let a = entries.insert(&mut dir, b"a", 3, 10).unwrap();
        let b = entries.insert(&mut dir, b"b", 4, 11).unwrap();
        assert_eq!(a, EntryLocation { block: 4, offset: 0 });
        assert_eq!(b, EntryLocation { block: 4, offset: 16 });
        assert_eq!(dir.size(), 32);
        assert_eq!(dir.mtime, 11);
        assert_eq!(dir.ctime, 11);

        let (location, entry) = entries.find(&dir, b"b").unwrap().unwrap();
        assert_eq!(location, b);
        assert_eq!(entry.ino, 4);
        assert!(entries.find(&dir, b"c").unwrap().is_none());
    }

    #[test]
    fn test_freed_slot_is_reused_without_growing() {
        let store = MemoryBlockStore::new(8);
        let entries = DirectoryStore::new(&store, WriteBack::Deferred);
        let mut dir = directory(1);
        let a = entries.insert(&mut dir, b"a", 3, 1).unwrap();
        entries.insert(&mut dir, b"b", 4, 1).unwrap();
        entries.remove(a).unwrap();
        assert!(entries.find(&dir, b"a").unwrap().is_none());

        let c = entries.insert(&mut dir, b"c", 5, 2).unwrap();
        assert_eq!(c, a);
        assert_eq!(dir.size(), 32);
        // only mtime moves when the size does not
        assert_eq!(dir.ctime, 1);
        assert_eq!(dir.mtime, 2);
        let names: Vec<_> = entries
            .entries(&dir)
            .unwrap()
            .iter()
            .map(|e| e.name().to_vec())
            .collect();
        assert_eq!(names, vec![b"c".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_full_directory() {
        let store = MemoryBlockStore::new(8);
        let entries = DirectoryStore::new(&store, WriteBack::Deferred);
        let mut dir = directory(1);
        for i in 0..32u32 {
            entries
                .insert(&mut dir, format!("f{i}").as_bytes(), 3 + i, 0)
                .unwrap();
        }
        assert_eq!(dir.size(), 512);
        assert!(matches!(
            entries.insert(&mut dir, b"more", 99, 0),
            Err(Error::NoSpaceInDirectory)
        ));
        assert_eq!(dir.size(), 512);
        assert_eq!(entries.entries(&dir).unwrap().len(), 32);
    }

    #[test]
    fn test_insert_spills_into_next_block() {
        let store = MemoryBlockStore::new(8);
        let entries = DirectoryStore::new(&store, WriteBack::Deferred);
        let mut dir = directory(2);
        for i in 0..33u32 {
            entries
                .insert(&mut dir, format!("f{i}").as_bytes(), 3 + i, 0)
                .unwrap();
        }
        let (location, _) = entries.find(&dir, b"f32").unwrap().unwrap();
        assert_eq!(location, EntryLocation { block: 5, offset: 0 });
        assert_eq!(dir.size(), 33 * 16);
    }

    #[test]
    fn test_replace_and_errors() {
        let store = MemoryBlockStore::new(8);
        let entries = DirectoryStore::new(&store, WriteBack::Sync);
        let mut dir = directory(1);
        let location = entries.insert(&mut dir, b"x", 3, 0).unwrap();
        entries.replace(location, 7).unwrap();
        assert_eq!(entries.find(&dir, b"x").unwrap().unwrap().1.ino, 7);
        assert_eq!(store.sync_flushes(), 2);

        assert!(matches!(
            entries.find(&dir, b"abcdefghijklmno"),
            Err(Error::NameTooLong)
        ));
        let mut no_extent = DiskInode::new_regular(5, 0o644, 0, 0, 0);
        assert!(matches!(
            entries.insert(&mut no_extent, b"x", 3, 0),
            Err(Error::NoSpaceInDirectory)
        ));
    }
}
