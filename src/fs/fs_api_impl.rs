use std::{
    ffi::{OsStr, OsString},
    os::unix::ffi::OsStrExt,
    time::SystemTime,
};

use log::{debug, error, warn};

use crate::{
    block_store::{BlockStore, BLOCK_SIZE},
    error::{Error, Result},
    utils::{fs_size_calculator, time_util},
};

use super::{
    directory::{check_name, DirectoryStore},
    fs_layout::{AuFs, InodeRef, MountState},
    inode::{DiskInode, InodeAttr},
};

/// one used entry of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: OsString,
    pub ino: u32,
}

/// attributes to change, `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetAttr {
    /// permission bits only, the file type cannot change
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

fn display(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

impl<S: BlockStore> AuFs<S> {
    fn entries(&self) -> DirectoryStore<'_, S> {
        DirectoryStore::new(&self.store, self.write_mode())
    }

    fn directory_record(&self, dir: &InodeRef<'_, S>) -> Result<DiskInode> {
        let record = dir.record()?;
        if !record.is_dir() {
            return Err(Error::NotDirectory);
        }
        Ok(record)
    }

    /// find `name` in `dir`
    /// # Return
    /// a handle to the inode the entry names, `None` when there is no such entry
    pub fn lookup(&self, dir: &InodeRef<'_, S>, name: &OsStr) -> Result<Option<InodeRef<'_, S>>> {
        debug!("lookup() called with dir: {}, name: {:?}", dir.ino(), name);
        let state = self.state.lock();
        let dir_record = self.directory_record(dir)?;
        let found = self.entries().find(&dir_record, name.as_bytes())?;
        let inode = match found {
            Some((_, entry)) => Some(self.iget(entry.ino as u32)?),
            None => None,
        };
        drop(state);
        Ok(inode)
    }

    /// create an empty regular file in `dir`
    /// # Params
    /// - `mode`: permission bits of the new file
    pub fn create(&self, dir: &InodeRef<'_, S>, name: &OsStr, mode: u32) -> Result<InodeRef<'_, S>> {
        debug!(
            "create() called with dir: {}, name: {:?}, mode: {:o}",
            dir.ino(),
            name,
            mode
        );
        self.check_writable()?;
        let name = name.as_bytes();
        check_name(name)?;

        let mut state = self.state.lock();
        let dir_record = self.directory_record(dir)?;
        if self.entries().find(&dir_record, name)?.is_some() {
            return Err(Error::AlreadyExists(display(name)));
        }
        let ino = state.bitmap.allocate().ok_or(Error::NoSpace)?;
        state.free_inodes = state.free_inodes.saturating_sub(1);

        let now = time_util::now();
        let options = self.options();
        let record = DiskInode::new_regular(
            ino,
            libc::S_IFREG as u32 | (mode & 0o7777),
            options.uid,
            options.gid,
            now,
        );
        let mut entry_location = None;
        let inserted = match self
            .inode_table
            .write(&self.store, ino, &record, self.write_mode())
        {
            Ok(()) => self.modify_inode(&mut state, dir.ino(), |d| {
                entry_location = Some(self.entries().insert(d, name, ino, now)?);
                Ok(())
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = inserted {
            warn!("create of {:?} rolled back: {e}", display(name));
            // the entry block may already be written when the directory inode is not
            if let Some(location) = entry_location {
                if let Err(remove) = self.entries().remove(location) {
                    error!("failed to remove entry of inode {ino}: {remove}");
                }
            }
            state.bitmap.release(ino);
            state.free_inodes += 1;
            if let Err(clear) = self.inode_table.clear(&self.store, ino, self.write_mode()) {
                error!("failed to clear inode {ino}: {clear}");
            }
            return Err(e);
        }
        self.dump_imap("create", &state);

        let inode = self.iget(ino)?;
        drop(state);
        Ok(inode)
    }

    /// add another name for `existing` in `dir`
    pub fn link(&self, existing: &InodeRef<'_, S>, dir: &InodeRef<'_, S>, name: &OsStr) -> Result<()> {
        debug!(
            "link() called with inode: {}, dir: {}, name: {:?}",
            existing.ino(),
            dir.ino(),
            name
        );
        self.check_writable()?;
        let name = name.as_bytes();
        check_name(name)?;

        let mut state = self.state.lock();
        let dir_record = self.directory_record(dir)?;
        if self.entries().find(&dir_record, name)?.is_some() {
            return Err(Error::AlreadyExists(display(name)));
        }
        let now = time_util::now();
        self.modify_inode(&mut state, dir.ino(), |d| {
            self.entries().insert(d, name, existing.ino(), now)
        })?;
        self.modify_inode(&mut state, existing.ino(), |r| {
            r.nlink += 1;
            r.ctime = now;
            Ok(())
        })?;
        Ok(())
    }

    /// Remove the entry `name` of `dir`, which must name `inode`.
    /// The inode itself is reclaimed once its last link and handle are gone.
    pub fn unlink(&self, dir: &InodeRef<'_, S>, name: &OsStr, inode: &InodeRef<'_, S>) -> Result<()> {
        debug!(
            "unlink() called with dir: {}, name: {:?}, inode: {}",
            dir.ino(),
            name,
            inode.ino()
        );
        self.check_writable()?;
        let mut state = self.state.lock();
        let dir_record = self.directory_record(dir)?;
        let location = match self.entries().find(&dir_record, name.as_bytes())? {
            Some((location, entry)) if entry.ino as u32 == inode.ino() => location,
            _ => return Err(Error::NotFound(name.to_string_lossy().into_owned())),
        };

        let now = time_util::now();
        self.entries().remove(location)?;
        self.modify_inode(&mut state, dir.ino(), |d| {
            d.ctime = now;
            d.mtime = now;
            Ok(())
        })?;
        self.modify_inode(&mut state, inode.ino(), |r| {
            if r.nlink == 0 {
                warn!("unlinking non-existent file {} (nlink=0)", inode.ino());
                r.nlink = 1;
            }
            r.nlink -= 1;
            r.ctime = now;
            Ok(())
        })?;
        Ok(())
    }

    /// Move the entry `old_name` of `old_dir` to `new_name` in `new_dir`.
    /// An existing destination entry is pointed at the moved inode and the
    /// inode it named loses one link.
    pub fn rename(
        &self,
        old_dir: &InodeRef<'_, S>,
        old_name: &OsStr,
        new_dir: &InodeRef<'_, S>,
        new_name: &OsStr,
    ) -> Result<()> {
        debug!(
            "rename() called with old dir: {}, old name: {:?}, new dir: {}, new name: {:?}",
            old_dir.ino(),
            old_name,
            new_dir.ino(),
            new_name
        );
        self.check_writable()?;
        let new_name = new_name.as_bytes();
        check_name(new_name)?;

        let mut state = self.state.lock();
        let old_dir_record = self.directory_record(old_dir)?;
        let new_dir_record = self.directory_record(new_dir)?;
        let (old_location, old_entry) = self
            .entries()
            .find(&old_dir_record, old_name.as_bytes())?
            .ok_or_else(|| Error::NotFound(old_name.to_string_lossy().into_owned()))?;
        let ino = old_entry.ino as u32;
        if self.read_record(ino)?.is_dir() {
            return Err(Error::InvalidArgument("cannot rename a directory".into()));
        }

        let now = time_util::now();
        match self.entries().find(&new_dir_record, new_name)? {
            Some((_, entry)) if entry.ino as u32 == ino => return Ok(()),
            Some((new_location, entry)) => {
                let displaced = entry.ino as u32;
                self.entries().replace(new_location, ino)?;
                self.modify_inode(&mut state, new_dir.ino(), |d| {
                    d.mtime = now;
                    Ok(())
                })?;
                self.entries().remove(old_location)?;
                self.touch_directory(&mut state, old_dir.ino(), now)?;
                self.modify_inode(&mut state, displaced, |r| {
                    r.nlink = r.nlink.saturating_sub(1);
                    r.ctime = now;
                    Ok(())
                })?;
            }
            None => {
                self.modify_inode(&mut state, new_dir.ino(), |d| {
                    self.entries().insert(d, new_name, ino, now)
                })?;
                self.entries().remove(old_location)?;
                self.touch_directory(&mut state, old_dir.ino(), now)?;
            }
        }
        Ok(())
    }

    fn touch_directory(
        &self,
        state: &mut MountState,
        ino: u32,
        now: u32,
    ) -> Result<()> {
        self.modify_inode(state, ino, |d| {
            d.ctime = now;
            d.mtime = now;
            Ok(())
        })
    }

    /// the used entries of `dir`, `.` and `..` included
    pub fn read_dir(&self, dir: &InodeRef<'_, S>) -> Result<Vec<DirEntryInfo>> {
        debug!("read_dir() called with dir: {}", dir.ino());
        let _state = self.state.lock();
        let dir_record = self.directory_record(dir)?;
        let entries = self
            .entries()
            .entries(&dir_record)?
            .into_iter()
            .map(|entry| DirEntryInfo {
                name: OsStr::from_bytes(entry.name()).to_os_string(),
                ino: entry.ino as u32,
            })
            .collect();
        Ok(entries)
    }

    /// read from a regular file, returns the bytes read (0 at or past the end)
    pub fn read_at(&self, inode: &InodeRef<'_, S>, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let record = inode.record()?;
        if record.is_dir() {
            return Err(Error::IsDirectory);
        }
        let size = record.size();
        if offset >= size {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(size - offset) as usize;

        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let block_id = record.start_block as u64 + pos / BLOCK_SIZE as u64;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let n = (BLOCK_SIZE - in_block).min(len - done);
            self.store.read_block(block_id, &mut block)?;
            buf[done..done + n].copy_from_slice(&block[in_block..in_block + n]);
            done += n;
        }
        Ok(len)
    }

    /// Write into a regular file.
    ///
    /// A file without an extent first gets one of `ceil((offset + len) / 512)`
    /// zeroed blocks after the last allocated extent. Files never grow past
    /// their extent, such a write fails with [Error::NoSpace].
    pub fn write_at(&self, inode: &InodeRef<'_, S>, offset: u64, data: &[u8]) -> Result<usize> {
        debug!(
            "write_at() called with inode: {}, offset: {}, len: {}",
            inode.ino(),
            offset,
            data.len()
        );
        self.check_writable()?;
        let mut state = self.state.lock();
        let record = self.read_record(inode.ino())?;
        if record.is_dir() {
            return Err(Error::IsDirectory);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| Error::InvalidArgument(format!("offset {offset} overflows")))?;

        let allocation = if record.has_extent() {
            if end > record.capacity() {
                return Err(Error::NoSpace);
            }
            None
        } else {
            let blocks = fs_size_calculator::blocks_for(end);
            let first = (state.last_end_block + 1).max(self.superblock().data_start_block()) as u64;
            let last = first + blocks - 1;
            if blocks > state.free_blocks || last >= self.total_blocks() {
                return Err(Error::NoSpace);
            }
            let zero = [0u8; BLOCK_SIZE];
            for block_id in first..=last {
                self.store.write_block(block_id, &zero)?;
                self.store.flush_block(block_id, self.write_mode())?;
            }
            Some((first as u32, last as u32, blocks))
        };

        // the record only learns about a new extent once its data is in place
        let start_block = allocation.map_or(record.start_block, |(first, _, _)| first);
        self.write_extent(start_block, offset, data)?;

        let size = match allocation {
            Some(_) => end,
            None => record.size().max(end),
        };
        let now = time_util::now();
        self.modify_inode(&mut state, inode.ino(), |r| {
            if let Some((first, last, _)) = allocation {
                r.start_block = first;
                r.end_block = last;
            }
            r.set_size(size);
            r.mtime = now;
            r.ctime = now;
            Ok(())
        })?;
        if let Some((first, last, blocks)) = allocation {
            state.last_end_block = last;
            state.free_blocks -= blocks;
            debug!("allocated blocks {first}..={last} to inode {}", inode.ino());
        }
        Ok(data.len())
    }

    fn write_extent(&self, start_block: u32, offset: u64, data: &[u8]) -> Result<()> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < data.len() {
            let pos = offset + done as u64;
            let block_id = start_block as u64 + pos / BLOCK_SIZE as u64;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let n = (BLOCK_SIZE - in_block).min(data.len() - done);
            if n < BLOCK_SIZE {
                self.store.read_block(block_id, &mut block)?;
            }
            block[in_block..in_block + n].copy_from_slice(&data[done..done + n]);
            self.store.write_block(block_id, &block)?;
            self.store.flush_block(block_id, self.write_mode())?;
            done += n;
        }
        Ok(())
    }

    /// change the attributes of an inode, ctime is always updated
    pub fn set_attr(&self, inode: &InodeRef<'_, S>, attr: SetAttr) -> Result<InodeAttr> {
        debug!(
            "set_attr() called with inode: {}, attr: {:?}",
            inode.ino(),
            attr
        );
        self.check_writable()?;
        let mut state = self.state.lock();
        let now = time_util::now();
        let record = self.modify_inode(&mut state, inode.ino(), |r| {
            if let Some(mode) = attr.mode {
                r.mode = (r.mode & libc::S_IFMT as u32) | (mode & 0o7777);
            }
            if let Some(uid) = attr.uid {
                r.uid = uid;
            }
            if let Some(gid) = attr.gid {
                r.gid = gid;
            }
            if let Some(atime) = attr.atime {
                r.atime = time_util::from_system_time(atime);
            }
            if let Some(mtime) = attr.mtime {
                r.mtime = time_util::from_system_time(mtime);
            }
            r.ctime = now;
            Ok(r.clone())
        })?;
        Ok(InodeAttr::from_disk(inode.ino(), &record))
    }
}
