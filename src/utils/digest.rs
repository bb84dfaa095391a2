//! MD5 digest helpers for the authenticated framing trailer.

use md5::{Digest, Md5};

/// Raw 16-byte MD5 digest of `data`.
pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex encoding of the MD5 digest of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5_digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_answer() {
        // RFC 1321 test vector.
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            md5_digest(b"abc")[..4],
            [0x90, 0x01, 0x50, 0x98],
        );
    }
}
