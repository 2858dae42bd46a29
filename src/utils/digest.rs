use bincode::config;
use serde::Serialize;

use crate::error::{Error, Result};

/// cacluate [blake3] hash of a serilizeable object
pub fn digest<T: Serialize>(t: &T) -> Result<[u8; 32]> {
    let mut hasher = blake3::Hasher::new();
    let config = config::legacy();
    let encoded =
        bincode::serde::encode_to_vec(t, config).map_err(|e| Error::Codec(e.to_string()))?;
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}

/// a stable 64-bit identifier taken from the digest of an object,
/// reported as the filesystem id
pub fn fsid<T: Serialize>(t: &T) -> Result<u64> {
    let hash = digest(t)?;
    let mut id = [0u8; 8];
    id.copy_from_slice(&hash[..8]);
    Ok(u64::from_le_bytes(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsid_is_stable_and_content_dependent() {
        assert_eq!(fsid(&"volume-a").unwrap(), fsid(&"volume-a").unwrap());
        assert_ne!(fsid(&"volume-a").unwrap(), fsid(&"volume-b").unwrap());
    }

    #[test]
    fn test_digest_matches_encoded_bytes() {
        let value = (7u32, [1u8, 2, 3]);
        let encoded = bincode::serde::encode_to_vec(value, config::legacy()).unwrap();
        assert_eq!(digest(&value).unwrap(), *blake3::hash(&encoded).as_bytes());
    }
}
