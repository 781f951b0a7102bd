//! MD5 integrity digest helpers. Thin wrapper over the `md5` crate — the
//! transfer engine never computes a hash by hand (§1 "consumed through
//! thin interfaces").

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Compute the hex MD5 digest of a byte slice.
pub fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Compute the hex MD5 digest of a file on disk.
///
/// The caller is expected to have flushed and closed any writer first —
/// this re-opens and re-reads the file from scratch (§4.5, §9 "Re-opening
/// the file for digest").
pub fn hex_digest_of_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .with_context(|| format!("reading {} for digest verification", path.display()))?;
    Ok(hex_digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bytes_digest_matches_known_value() {
        assert_eq!(hex_digest(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn file_digest_matches_byte_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(hex_digest_of_file(&path).unwrap(), hex_digest(b"hello world"));
    }
}
