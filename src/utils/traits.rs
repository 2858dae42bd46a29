use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// Trait for fixed-size records stored at fixed offsets inside a block
/// # Note
/// The encoding is bincode's legacy configuration: fixed-width integers,
/// little-endian, arrays without length prefix. A `#[derive(Serialize)]`
/// struct therefore lays out exactly like its packed on-disk counterpart.
pub trait OnDisk: Serialize + DeserializeOwned {
    /// encoded size in bytes
    const SIZE: usize;

    /// encode into the first [Self::SIZE] bytes of `buf`
    fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        let dst = buf
            .get_mut(..Self::SIZE)
            .ok_or_else(|| Error::Codec(format!("need {} bytes to encode", Self::SIZE)))?;
        let config = bincode::config::legacy();
        let written = bincode::serde::encode_into_slice(self, dst, config)
            .map_err(|e| Error::Codec(e.to_string()))?;
        if written != Self::SIZE {
            return Err(Error::Codec(format!(
                "encoded {written} bytes, expected {}",
                Self::SIZE
            )));
        }
        Ok(())
    }

    /// decode from the first [Self::SIZE] bytes of `buf`
    fn decode(buf: &[u8]) -> Result<Self> {
        let src = buf
            .get(..Self::SIZE)
            .ok_or_else(|| Error::Codec(format!("need {} bytes to decode", Self::SIZE)))?;
        let config = bincode::config::legacy();
        let (object, _bytes_read): (Self, usize) =
            bincode::serde::decode_from_slice(src, config)
                .map_err(|e| Error::Codec(e.to_string()))?;
        Ok(object)
    }
}
