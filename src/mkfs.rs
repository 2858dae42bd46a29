//! create our filesystem
use std::{
    fs::OpenOptions,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use anyhow::anyhow;
use byte_unit::Byte;
use log::{debug, info};

use crate::{
    block_store::{BlockStore, MmapBlockStore, WriteBack, BLOCK_SIZE},
    error::{Error, Result},
    fs::{
        check_name, DirectoryStore, DiskInode, InodeTable, SuperBlock, DIRENTS_PER_BLOCK,
        ROOT_INODE,
    },
    utils::{fs_size_calculator, time_util},
};

/// largest inode table mkfs will lay out
pub const MAX_INODE_COUNT: u32 = 512;

/// how a new volume is laid out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkfsOptions {
    /// inode table slots, the root directory takes the first one
    pub inode_count: u32,
    /// blocks of the root directory extent, 32 entries each
    pub root_dir_blocks: u32,
    pub fsname: String,
    pub volume: String,
    /// owner of the root directory and packed files
    pub uid: u32,
    pub gid: u32,
}

impl Default for MkfsOptions {
    fn default() -> Self {
        MkfsOptions {
            inode_count: 64,
            root_dir_blocks: 1,
            fsname: "aufs".into(),
            volume: "aufs".into(),
            uid: users::get_effective_uid(),
            gid: users::get_effective_gid(),
        }
    }
}

/// Lay out a fresh volume on `store`: superblock, zeroed inode table, a root
/// directory holding `.` and `..`, and one regular file per entry of `files`
/// packed in contiguous extents after the root directory.
/// # Params
/// - `files`: `(name, content)` pairs stored in the root directory
/// # Return
/// the superblock that was written
pub fn format<S: BlockStore>(
    store: &S,
    options: &MkfsOptions,
    files: &[(&[u8], &[u8])],
) -> Result<SuperBlock> {
    if !(1..=MAX_INODE_COUNT).contains(&options.inode_count) {
        return Err(Error::InvalidArgument(format!(
            "inode count must be in 1..={MAX_INODE_COUNT}, got {}",
            options.inode_count
        )));
    }
    if options.root_dir_blocks == 0 {
        return Err(Error::InvalidArgument(
            "root directory needs at least one block".into(),
        ));
    }
    if files.len() >= options.inode_count as usize {
        return Err(Error::NoSpace);
    }
    if files.len() + 2 > options.root_dir_blocks as usize * DIRENTS_PER_BLOCK {
        return Err(Error::NoSpaceInDirectory);
    }
    for (name, _) in files {
        check_name(name)?;
    }

    let total_blocks = store.block_count();
    if total_blocks * BLOCK_SIZE as u64 > u32::MAX as u64 + 1 {
        return Err(Error::InvalidArgument(format!(
            "volume of {total_blocks} blocks is past the 4 GiB offset limit"
        )));
    }
    let data_start = fs_size_calculator::data_start_block(options.inode_count);
    let file_blocks: u64 = files
        .iter()
        .map(|(_, data)| fs_size_calculator::blocks_for(data.len() as u64))
        .sum();
    let needed = data_start as u64 + options.root_dir_blocks as u64 + file_blocks;
    if needed > total_blocks {
        return Err(Error::NoSpace);
    }

    let superblock = SuperBlock::new(
        fs_size_calculator::data_start_offset(options.inode_count),
        (total_blocks * BLOCK_SIZE as u64 - 1) as u32,
        &options.fsname,
        &options.volume,
    );
    superblock.write_to(store, WriteBack::Deferred)?;

    // inode table and root directory start out zeroed
    let zero = [0u8; BLOCK_SIZE];
    for block_id in 1..(data_start + options.root_dir_blocks) as u64 {
        store.write_block(block_id, &zero)?;
    }

    let now = time_util::now();
    let table = InodeTable::new(superblock.last_inode());
    let entries = DirectoryStore::new(store, WriteBack::Deferred);
    let root_extent = (data_start, data_start + options.root_dir_blocks - 1);
    let mut root = DiskInode::new_directory(
        ROOT_INODE,
        libc::S_IFDIR as u32 | 0o755,
        root_extent,
        0,
        now,
    );
    root.uid = options.uid;
    root.gid = options.gid;
    entries.insert(&mut root, b".", ROOT_INODE, now)?;
    entries.insert(&mut root, b"..", ROOT_INODE, now)?;

    let mut next_block = root_extent.1 + 1;
    for (ino, (name, data)) in (ROOT_INODE + 1..).zip(files) {
        let mut inode = DiskInode::new_regular(
            ino,
            libc::S_IFREG as u32 | 0o644,
            options.uid,
            options.gid,
            now,
        );
        if !data.is_empty() {
            let blocks = fs_size_calculator::blocks_for(data.len() as u64) as u32;
            inode.start_block = next_block;
            inode.end_block = next_block + blocks - 1;
            inode.set_size(data.len() as u64);
            for (block_id, chunk) in (next_block as u64..).zip(data.chunks(BLOCK_SIZE)) {
                let mut block = [0u8; BLOCK_SIZE];
                block[..chunk.len()].copy_from_slice(chunk);
                store.write_block(block_id, &block)?;
            }
            next_block += blocks;
        }
        table.write(store, ino, &inode, WriteBack::Deferred)?;
        entries.insert(&mut root, name, ino, now)?;
        debug!(
            "packed {:?} as inode {ino}, {} bytes",
            String::from_utf8_lossy(name),
            data.len()
        );
    }
    table.write(store, ROOT_INODE, &root, WriteBack::Deferred)?;
    store.flush(WriteBack::Sync)?;

    info!(
        "formatted {total_blocks} blocks: {} inodes, data from block {data_start}, {} files",
        options.inode_count,
        files.len()
    );
    Ok(superblock)
}

/// create a new filesystem image file
/// # Params
/// - `image_file_path`: the path of the image file, must not exist yet
/// - `file_size`: the size of the image file, rounded down to whole blocks
/// - `options`: see [MkfsOptions]
/// - `files`: host files to copy into the root directory
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(
    image_file_path: P,
    file_size: u64,
    options: &MkfsOptions,
    files: &[PathBuf],
) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    // check if specified image_file_size is enough
    let space_needed =
        fs_size_calculator::min_image_size(options.inode_count, options.root_dir_blocks);
    if file_size < space_needed {
        return Err(anyhow!(
            "File size must be at least {} for {} inodes and {} root directory blocks",
            Byte::from_bytes(space_needed as _).get_appropriate_unit(true),
            options.inode_count,
            options.root_dir_blocks
        ));
    }

    let mut contents = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
        let data = std::fs::read(path)?;
        contents.push((name.as_bytes().to_vec(), data));
    }
    let packed: Vec<(&[u8], &[u8])> = contents
        .iter()
        .map(|(name, data)| (name.as_slice(), data.as_slice()))
        .collect();

    // open image file and prepare to write fs components
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(image_file_path.as_ref())?;
    // all other region are set to zero using `set_len` method
    file.set_len(file_size / BLOCK_SIZE as u64 * BLOCK_SIZE as u64)?;

    let store = MmapBlockStore::from_file(&file, false)?;
    format(&store, options, &packed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block_store::MemoryBlockStore,
        fs::{AuFs, FileKind, MountOptions},
    };
    use std::ffi::OsStr;

    fn options(inode_count: u32) -> MkfsOptions {
        MkfsOptions {
            inode_count,
            uid: 1000,
            gid: 100,
            ..MkfsOptions::default()
        }
    }

    #[test]
    fn test_format_lays_out_root() {
        let store = MemoryBlockStore::new(32);
        let superblock = format(&store, &options(16), &[]).unwrap();
        assert_eq!(superblock.start, 3 * 512);
        assert_eq!(superblock.end, 32 * 512 - 1);
        assert_eq!(superblock.fsname(), "aufs");

        let table = InodeTable::new(superblock.last_inode());
        let root = table.read(&store, ROOT_INODE).unwrap();
        assert_eq!(root.kind(), FileKind::Directory);
        assert_eq!(root.start_block, 3);
        assert_eq!(root.end_block, 3);
        assert_eq!(root.size(), 32);
        assert_eq!(root.nlink, 2);
        assert_eq!(root.mode, libc::S_IFDIR as u32 | 0o755);
        assert_eq!((root.uid, root.gid), (1000, 100));
        assert!(table.read(&store, 3).unwrap().is_free());
        assert_eq!(store.sync_flushes(), 1);
    }

    #[test]
    fn test_format_packs_files() {
        let store = MemoryBlockStore::new(32);
        let big = vec![7u8; 700];
        let files: [(&[u8], &[u8]); 3] = [(b"a", b"hello"), (b"empty", b""), (b"big", big.as_slice())];
        format(&store, &options(16), &files).unwrap();

        let fs = AuFs::mount(store, MountOptions::default()).unwrap();
        let root = fs.root().unwrap();
        let a = fs.lookup(&root, OsStr::new("a")).unwrap().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(fs.read_at(&a, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(a.record().unwrap().start_block, 4);

        let empty = fs.lookup(&root, OsStr::new("empty")).unwrap().unwrap();
        assert!(empty.record().unwrap().has_empty_sentinel());

        let big_file = fs.lookup(&root, OsStr::new("big")).unwrap().unwrap();
        let record = big_file.record().unwrap();
        assert_eq!((record.start_block, record.end_block), (5, 6));
        assert_eq!(record.size(), 700);

        let stat = fs.statfs();
        // root, a and big hold 4 of the 29 data blocks
        assert_eq!(stat.free_blocks, 25);
        assert_eq!(stat.free_files, 12);
    }

    #[test]
    fn test_format_rejects_bad_options() {
        let store = MemoryBlockStore::new(32);
        assert!(matches!(
            format(&store, &options(0), &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            format(&store, &options(513), &[]),
            Err(Error::InvalidArgument(_))
        ));
        let no_dir = MkfsOptions {
            root_dir_blocks: 0,
            ..options(16)
        };
        assert!(matches!(
            format(&store, &no_dir, &[]),
            Err(Error::InvalidArgument(_))
        ));
        // 64 table blocks do not fit in 32
        assert!(matches!(
            format(&store, &options(512), &[]),
            Err(Error::NoSpace)
        ));
        let long_name: [(&[u8], &[u8]); 1] = [(b"a_very_long_name", b"")];
        assert!(matches!(
            format(&store, &options(16), &long_name),
            Err(Error::NameTooLong)
        ));
    }

    #[test]
    fn test_mkfs_creates_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let host_file = dir.path().join("notes.txt");
        std::fs::write(&host_file, b"some notes").unwrap();
        let image = dir.path().join("fs.img");

        mkfs(&image, 64 * 512 + 100, &options(32), &[host_file]).unwrap();
        assert_eq!(std::fs::metadata(&image).unwrap().len(), 64 * 512);

        let store = MmapBlockStore::open(&image, true).unwrap();
        let fs = AuFs::mount(store, MountOptions::default()).unwrap();
        let root = fs.root().unwrap();
        let notes = fs.lookup(&root, OsStr::new("notes.txt")).unwrap().unwrap();
        assert_eq!(notes.attr().unwrap().size, 10);
    }

    #[test]
    fn test_mkfs_refuses_small_or_existing_images() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fs.img");
        let err = mkfs(&image, 512, &options(16), &[]).unwrap_err();
        assert!(err.to_string().starts_with("File size must be at least"));
        assert!(!image.exists());

        std::fs::write(&image, b"").unwrap();
        assert!(mkfs(&image, 64 * 512, &options(16), &[]).is_err());
    }
}
