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

//! Streaming body canonicalization and hashing.

use crate::{
    cache::{BodyStore, RetainedBody},
    canonicalize::BodyCanonicalizer,
    crypto::{HashAlgorithm, StreamingHasher},
    util,
};
use std::{collections::BTreeMap, io};
use tracing::trace;

/// A body processor that canonicalizes and hashes body chunks as they arrive,
/// and optionally retains the original bytes.
///
/// The canonicalized output is computed once per chunk and fed to one hasher
/// per registered hash algorithm.
pub struct RelaxedBody {
    canonicalizer: BodyCanonicalizer,
    hashers: BTreeMap<HashAlgorithm, StreamingHasher>,
    store: Option<BodyStore>,
}

impl RelaxedBody {
    pub fn new(hash_alg: HashAlgorithm) -> Self {
        let mut hashers = BTreeMap::new();
        hashers.insert(hash_alg, StreamingHasher::new(hash_alg));

        Self {
            canonicalizer: BodyCanonicalizer::new(),
            hashers,
            store: None,
        }
    }

    /// Additionally computes the body hash with the given algorithm.
    pub fn with_hash_algorithm(mut self, hash_alg: HashAlgorithm) -> Self {
        self.hashers
            .entry(hash_alg)
            .or_insert_with(|| StreamingHasher::new(hash_alg));
        self
    }

    /// Retains the original body bytes in the given store.
    pub fn with_store(mut self, store: BodyStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Whether the retained body has been moved to a cache file.
    pub fn using_cache(&self) -> bool {
        self.store.as_ref().map_or(false, |s| s.using_cache())
    }

    /// Processes a chunk of original body data.
    ///
    /// An error is returned only when writing to the body store fails.
    pub async fn process_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if let Some(store) = &mut self.store {
            store.write(chunk).await?;
        }

        let canonicalized_chunk = self.canonicalizer.canonicalize_chunk(chunk);
        self.update_hashers(&canonicalized_chunk);

        Ok(())
    }

    pub async fn finish(mut self) -> io::Result<BodyHashResults> {
        let canonicalized_chunk = self.canonicalizer.finish();
        for hasher in self.hashers.values_mut() {
            hasher.update(&canonicalized_chunk);
        }

        let hashes = self
            .hashers
            .into_iter()
            .map(|(hash_alg, hasher)| {
                trace!("{hash_alg} body hash over {} canonical bytes", hasher.bytes_written());
                (hash_alg, hasher.finish())
            })
            .collect();

        let retained = match self.store {
            Some(store) => Some(store.finish().await?),
            None => None,
        };

        Ok(BodyHashResults { hashes, retained })
    }

    fn update_hashers(&mut self, canonicalized_chunk: &[u8]) {
        if canonicalized_chunk.is_empty() {
            return;
        }
        for hasher in self.hashers.values_mut() {
            hasher.update(canonicalized_chunk);
        }
    }
}

/// The outcome of body processing.
pub struct BodyHashResults {
    hashes: BTreeMap<HashAlgorithm, Box<[u8]>>,
    retained: Option<RetainedBody>,
}

impl BodyHashResults {
    /// Returns the body hash for a registered hash algorithm.
    pub fn get(&self, hash_alg: HashAlgorithm) -> Option<&[u8]> {
        self.hashes.get(&hash_alg).map(|h| &h[..])
    }

    /// Returns the body hash as a Base64 string, as used in the *bh=* tag.
    pub fn get_base64(&self, hash_alg: HashAlgorithm) -> Option<String> {
        self.get(hash_alg).map(util::encode_base64)
    }

    pub fn take_retained(&mut self) -> Option<RetainedBody> {
        self.retained.take()
    }
}
