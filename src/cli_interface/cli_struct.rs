use std::str::FromStr;

use byte_unit::Byte;
use clap::Parser;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum AufsCli {
    /// create a new file system
    Mkfs(MkfsArgs),
    /// show the superblock and usage counters
    Stat(StatArgs),
    /// list the root directory
    Ls(StatArgs),
    /// create an empty file
    Touch(NameArgs),
    /// add a hard link to a file
    Ln(TwoNameArgs),
    /// remove a name
    Rm(NameArgs),
    /// rename a file
    Mv(TwoNameArgs),
    /// print a file to stdout
    Cat(NameArgs),
    /// copy a host file into the file system
    Put(PutArgs),
}

/// parse sizes like `30`, `64KiB` or `1 MB` into bytes
fn parse_size(s: &str) -> Result<u64, String> {
    let bytes = Byte::from_str(s).map_err(|e| e.to_string())?.get_bytes();
    u64::try_from(bytes).map_err(|e| e.to_string())
}

///make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new file system")]
pub struct MkfsArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the size of the file system
    #[clap(short, long, value_parser = parse_size)]
    pub size: u64,
    /// the inode count of the file system, at most 512
    #[clap(short, long)]
    pub inode_count: u32,
    /// blocks reserved for the root directory
    #[clap(short = 'd', long, default_value_t = 1)]
    pub dir_blocks: u32,
    #[clap(long, default_value = "aufs")]
    pub fsname: String,
    #[clap(long, default_value = "aufs")]
    pub volume: String,
    /// host files to copy into the root directory
    pub files: Vec<String>,
}

/// which image to open and how
#[derive(clap::Args, Debug, PartialEq)]
pub struct ImageArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// mount without writing anything back
    #[clap(long)]
    pub read_only: bool,
    /// flush every metadata write before returning
    #[clap(long)]
    pub durable: bool,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct StatArgs {
    #[command(flatten)]
    pub image: ImageArgs,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct NameArgs {
    #[command(flatten)]
    pub image: ImageArgs,
    /// a name in the root directory
    pub name: String,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct TwoNameArgs {
    #[command(flatten)]
    pub image: ImageArgs,
    pub from: String,
    pub to: String,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct PutArgs {
    #[command(flatten)]
    pub image: ImageArgs,
    /// the name in the root directory
    pub name: String,
    /// the host file to copy
    pub host_file: String,
}


/// test the file subcommands
#[cfg(test)]
mod file_parse_args_tests {
    use super::*;

    fn image(read_only: bool, durable: bool) -> ImageArgs {
        ImageArgs {
            image_file_path: "test".to_string(),
            read_only,
            durable,
        }
    }

    #[test]
    fn test_flags() {
        let args = AufsCli::parse_from(["aufs", "ls", "-p", "test", "--read-only"]);
        assert_eq!(
            args,
            AufsCli::Ls(StatArgs {
                image: image(true, false)
            })
        );
        let args = AufsCli::parse_from(["aufs", "touch", "--durable", "-p", "test", "new"]);
        assert_eq!(
            args,
            AufsCli::Touch(NameArgs {
                image: image(false, true),
                name: "new".to_string(),
            })
        );
    }

    #[test]
    fn test_two_names() {
        let args = AufsCli::parse_from(["aufs", "mv", "-p", "test", "old", "new"]);
        assert_eq!(
            args,
            AufsCli::Mv(TwoNameArgs {
                image: image(false, false),
                from: "old".to_string(),
                to: "new".to_string(),
            })
        );
        assert!(AufsCli::try_parse_from(["aufs", "ln", "-p", "test", "only"]).is_err());
    }

    #[test]
    fn test_put() {
        let args = AufsCli::parse_from(["aufs", "put", "-p", "test", "inside", "/tmp/outside"]);
        assert_eq!(
            args,
            AufsCli::Put(PutArgs {
                image: image(false, false),
                name: "inside".to_string(),
                host_file: "/tmp/outside".to_string(),
            })
        );
    }
}
