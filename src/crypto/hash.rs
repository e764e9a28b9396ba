// dkim-stream – streaming DKIM signer
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

use crate::crypto::HashAlgorithm;
use sha1::Sha1;
use sha2::Sha256;

/// Computes the digest of some data in one go.
pub fn digest(hash_alg: HashAlgorithm, data: &[u8]) -> Box<[u8]> {
    let mut hasher = StreamingHasher::new(hash_alg);
    hasher.update(data);
    hasher.finish()
}

/// A hasher that is fed incrementally and counts the bytes it digested.
pub struct StreamingHasher {
    digest: Box<dyn digest::DynDigest + Send>,
    bytes_written: u64,
}

impl StreamingHasher {
    pub fn new(hash_alg: HashAlgorithm) -> Self {
        let digest: Box<dyn digest::DynDigest + Send> = match hash_alg {
            HashAlgorithm::Sha256 => Box::new(Sha256::default()),
            HashAlgorithm::Sha1 => Box::new(Sha1::default()),
        };

        Self {
            digest,
            bytes_written: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
        self.bytes_written += bytes.len() as u64;
    }

    /// The number of bytes digested so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn finish(self) -> Box<[u8]> {
        self.digest.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64ct::{Base64, Encoding};

    #[test]
    fn streaming_hasher_ok() {
        let mut hasher = StreamingHasher::new(HashAlgorithm::Sha256);
        hasher.update(b"ab");
        hasher.update(b"");
        hasher.update(b"c");
        assert_eq!(hasher.bytes_written(), 3);
        assert_eq!(hasher.finish(), digest(HashAlgorithm::Sha256, b"abc"));
    }

    #[test]
    fn rfc_examples() {
        // See §3.4.3:
        let hash = digest(HashAlgorithm::Sha256, b"\r\n");
        assert_eq!(Base64::encode_string(&hash), "frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY=");
        let hash = digest(HashAlgorithm::Sha1, b"\r\n");
        assert_eq!(Base64::encode_string(&hash), "uoq1oCgLlTqpdDX/iUbLy7J1Wic=");

        // See §3.4.4:
        let hash = digest(HashAlgorithm::Sha256, b"");
        assert_eq!(Base64::encode_string(&hash), "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
        let hash = digest(HashAlgorithm::Sha1, b"");
        assert_eq!(Base64::encode_string(&hash), "2jmj7l5rSw0yVb/vlWAYkK/YBwk=");
    }
}
