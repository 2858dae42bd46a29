pub mod block_store;
pub mod cli_interface;
pub mod error;
mod fs;
pub mod mkfs;
pub mod mount;
pub mod utils;
pub use error::{Error, Result};
pub use fs::*;
