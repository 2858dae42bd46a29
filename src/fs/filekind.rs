/// vnode type of a regular file on disk
pub const VTYPE_REGULAR: u32 = 1;
/// vnode type of a directory on disk
pub const VTYPE_DIRECTORY: u32 = 2;

/// an enum to describe the type of a file
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// an regular file
    RegularFile,
    /// a directory
    Directory,
    /// a vnode type this format does not know
    #[default]
    Unknown,
}

impl FileKind {
    pub fn from_vtype(vtype: u32) -> Self {
        match vtype {
            VTYPE_REGULAR => FileKind::RegularFile,
            VTYPE_DIRECTORY => FileKind::Directory,
            _ => FileKind::Unknown,
        }
    }

    /// the `S_IFMT` bits of this kind, unknown types get none
    pub fn mode_bits(self) -> u32 {
        match self {
            FileKind::RegularFile => libc::S_IFREG as u32,
            FileKind::Directory => libc::S_IFDIR as u32,
            FileKind::Unknown => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vtype_mapping() {
        assert_eq!(FileKind::from_vtype(1), FileKind::RegularFile);
        assert_eq!(FileKind::from_vtype(2), FileKind::Directory);
        assert_eq!(FileKind::from_vtype(0), FileKind::Unknown);
        assert_eq!(FileKind::from_vtype(7), FileKind::Unknown);
        assert_eq!(FileKind::Directory.mode_bits(), libc::S_IFDIR as u32);
        assert_eq!(FileKind::Unknown.mode_bits(), 0);
    }
}
