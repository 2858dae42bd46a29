//! open an image file and mount our filesystem on it
use std::path::Path;

use log::debug;

use crate::{
    block_store::MmapBlockStore,
    error::Result,
    fs::{AuFs, MountOptions},
};

/// Map `image_path` and mount the volume it holds.
/// A read-only mount maps the file copy-on-write, so the image is never changed.
pub fn mount<P>(image_path: P, options: MountOptions) -> Result<AuFs<MmapBlockStore>>
where
    P: AsRef<Path>,
{
    let image_path = image_path.as_ref();
    debug!(
        "mounting {} (read_only: {}, durable: {})",
        image_path.display(),
        options.read_only,
        options.durable_writes
    );
    let store = MmapBlockStore::open(image_path, options.read_only)?;
    AuFs::mount(store, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        mkfs::{mkfs, MkfsOptions},
    };
    use std::ffi::OsStr;

    #[test]
    fn test_mount_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fs.img");
        mkfs(&image, 128 * 512, &MkfsOptions::default(), &[]).unwrap();

        {
            let fs = mount(&image, MountOptions::default()).unwrap();
            let root = fs.root().unwrap();
            let file = fs.create(&root, OsStr::new("kept"), 0o644).unwrap();
            fs.write_at(&file, 0, b"on disk").unwrap();
            drop(file);
            drop(root);
            fs.unmount().unwrap();
        }

        let fs = mount(&image, MountOptions::default()).unwrap();
        let root = fs.root().unwrap();
        let file = fs.lookup(&root, OsStr::new("kept")).unwrap().unwrap();
        let mut buf = [0u8; 7];
        fs.read_at(&file, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"on disk");
    }

    #[test]
    fn test_read_only_mount_leaves_image_alone() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fs.img");
        mkfs(&image, 64 * 512, &MkfsOptions::default(), &[]).unwrap();
        let before = std::fs::read(&image).unwrap();

        let options = MountOptions {
            read_only: true,
            ..MountOptions::default()
        };
        let fs = mount(&image, options).unwrap();
        let root = fs.root().unwrap();
        assert!(matches!(
            fs.create(&root, OsStr::new("x"), 0o644),
            Err(Error::ReadOnly)
        ));
        drop(root);
        fs.unmount().unwrap();
        assert_eq!(std::fs::read(&image).unwrap(), before);
    }

    #[test]
    fn test_mount_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            mount(dir.path().join("absent.img"), MountOptions::default()),
            Err(Error::Io(_))
        ));
    }
}
