//! run one CLI subcommand against an image file
use std::{ffi::OsStr, io::Write, path::PathBuf};

use anyhow::anyhow;
use byte_unit::Byte;

use crate::{
    block_store::MmapBlockStore,
    fs::{AuFs, InodeRef, MountOptions},
    mkfs::{self, MkfsOptions},
    mount,
};

use super::cli_struct::{AufsCli, ImageArgs};

fn open(image: &ImageArgs) -> anyhow::Result<AuFs<MmapBlockStore>> {
    let options = MountOptions {
        read_only: image.read_only,
        durable_writes: image.durable,
        ..MountOptions::default()
    };
    Ok(mount::mount(&image.image_file_path, options)?)
}

fn find<'a>(
    fs: &'a AuFs<MmapBlockStore>,
    root: &InodeRef<'a, MmapBlockStore>,
    name: &str,
) -> anyhow::Result<InodeRef<'a, MmapBlockStore>> {
    fs.lookup(root, OsStr::new(name))?
        .ok_or_else(|| anyhow!("{name}: no such file"))
}

/// execute `args`, printing results to `out`
pub fn run<W: Write>(args: AufsCli, out: &mut W) -> anyhow::Result<()> {
    match args {
        AufsCli::Mkfs(args) => {
            let options = MkfsOptions {
                inode_count: args.inode_count,
                root_dir_blocks: args.dir_blocks,
                fsname: args.fsname,
                volume: args.volume,
                ..MkfsOptions::default()
            };
            let files: Vec<PathBuf> = args.files.iter().map(PathBuf::from).collect();
            mkfs::mkfs(&args.image_file_path, args.size, &options, &files)?;
        }
        AufsCli::Stat(args) => {
            let fs = open(&args.image)?;
            let superblock = fs.superblock();
            let stat = fs.statfs();
            writeln!(out, "fsname:      {}", superblock.fsname())?;
            writeln!(out, "volume:      {}", superblock.volume())?;
            writeln!(out, "fsid:        {:016x}", stat.fsid)?;
            writeln!(
                out,
                "size:        {}",
                Byte::from_bytes((stat.blocks * stat.block_size as u64) as _)
                    .get_appropriate_unit(true)
            )?;
            writeln!(out, "blocks:      {} ({} free)", stat.blocks, stat.free_blocks)?;
            writeln!(out, "inodes:      {} ({} free)", stat.files, stat.free_files)?;
            writeln!(out, "unclean:     {}", superblock.is_unclean())?;
            fs.unmount()?;
        }
        AufsCli::Ls(args) => {
            let fs = open(&args.image)?;
            {
                let root = fs.root()?;
                for entry in fs.read_dir(&root)? {
                    let attr = fs.iget(entry.ino)?.attr()?;
                    writeln!(
                        out,
                        "{:>5} {:>6o} {:>3} {:>8} {}",
                        entry.ino,
                        attr.mode,
                        attr.nlink,
                        attr.size,
                        entry.name.to_string_lossy()
                    )?;
                }
            }
            fs.unmount()?;
        }
        AufsCli::Touch(args) => {
            let fs = open(&args.image)?;
            {
                let root = fs.root()?;
                fs.create(&root, OsStr::new(&args.name), 0o644)?;
            }
            fs.unmount()?;
        }
        AufsCli::Ln(args) => {
            let fs = open(&args.image)?;
            {
                let root = fs.root()?;
                let existing = find(&fs, &root, &args.from)?;
                fs.link(&existing, &root, OsStr::new(&args.to))?;
            }
            fs.unmount()?;
        }
        AufsCli::Rm(args) => {
            let fs = open(&args.image)?;
            {
                let root = fs.root()?;
                let inode = find(&fs, &root, &args.name)?;
                if inode.is_dir()? {
                    return Err(anyhow!("{}: is a directory", args.name));
                }
                fs.unlink(&root, OsStr::new(&args.name), &inode)?;
            }
            fs.unmount()?;
        }
        AufsCli::Mv(args) => {
            let fs = open(&args.image)?;
            {
                let root = fs.root()?;
                fs.rename(&root, OsStr::new(&args.from), &root, OsStr::new(&args.to))?;
            }
            fs.unmount()?;
        }
        AufsCli::Cat(args) => {
            let fs = open(&args.image)?;
            {
                let root = fs.root()?;
                let inode = find(&fs, &root, &args.name)?;
                let mut buf = vec![0u8; inode.attr()?.size as usize];
                let read = fs.read_at(&inode, 0, &mut buf)?;
                out.write_all(&buf[..read])?;
            }
            fs.unmount()?;
        }
        AufsCli::Put(args) => {
            let data = std::fs::read(&args.host_file)?;
            let fs = open(&args.image)?;
            {
                let root = fs.root()?;
                let inode = match fs.lookup(&root, OsStr::new(&args.name))? {
                    Some(inode) => inode,
                    None => fs.create(&root, OsStr::new(&args.name), 0o644)?,
                };
                fs.write_at(&inode, 0, &data)?;
            }
            fs.unmount()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;

    fn aufs(image: &Path, args: &[&str]) -> anyhow::Result<String> {
        let mut argv = vec!["aufs", args[0], "-p", image.to_str().unwrap()];
        argv.extend_from_slice(&args[1..]);
        let mut out = Vec::new();
        run(AufsCli::parse_from(argv), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn formatted_image(dir: &Path) -> PathBuf {
        let image = dir.join("fs.img");
        let args = AufsCli::parse_from([
            "aufs",
            "mkfs",
            "-p",
            image.to_str().unwrap(),
            "-s",
            "64KiB",
            "-i",
            "32",
        ]);
        run(args, &mut Vec::new()).unwrap();
        image
    }

    #[test]
    fn test_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let image = formatted_image(dir.path());
        let host_file = dir.path().join("host.txt");
        std::fs::write(&host_file, b"hello from the host").unwrap();

        aufs(&image, &["put", "greeting", host_file.to_str().unwrap()]).unwrap();
        assert_eq!(
            aufs(&image, &["cat", "greeting"]).unwrap(),
            "hello from the host"
        );

        aufs(&image, &["ln", "greeting", "hi"]).unwrap();
        aufs(&image, &["mv", "greeting", "hello"]).unwrap();
        aufs(&image, &["touch", "empty"]).unwrap();
        let listing = aufs(&image, &["ls"]).unwrap();
        let names: Vec<_> = listing
            .lines()
            .map(|line| line.rsplit(' ').next().unwrap_or(""))
            .collect();
        // the renamed entry moved to a new slot, `empty` took the old one
        assert_eq!(names, vec![".", "..", "empty", "hi", "hello"]);

        aufs(&image, &["rm", "hi"]).unwrap();
        assert!(aufs(&image, &["cat", "hi"]).is_err());
        assert_eq!(
            aufs(&image, &["cat", "hello"]).unwrap(),
            "hello from the host"
        );
        assert!(aufs(&image, &["rm", "."]).is_err());
    }

    #[test]
    fn test_stat() {
        let dir = tempfile::tempdir().unwrap();
        let image = formatted_image(dir.path());
        let stat = aufs(&image, &["stat", "--read-only"]).unwrap();
        assert!(stat.contains("fsname:      aufs"));
        assert!(stat.contains("blocks:      128"));
        assert!(stat.contains("inodes:      32 (31 free)"));
    }

    #[test]
    fn test_read_only_flag() {
        let dir = tempfile::tempdir().unwrap();
        let image = formatted_image(dir.path());
        let err = aufs(&image, &["touch", "--read-only", "x"]).unwrap_err();
        assert_eq!(err.to_string(), "read-only filesystem");
        assert!(aufs(&image, &["touch", "--durable", "x"]).is_ok());
    }
}
