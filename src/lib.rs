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

//! A library for signing email messages with *DomainKeys Identified Mail*
//! (DKIM) signatures as described in [RFC 6376].
//!
//! Messages are processed as a stream of byte chunks. The header is split off
//! and the body is canonicalized and hashed as it arrives, using *relaxed*
//! canonicalization for both header and body. The original bytes are never
//! altered: the output is the message exactly as received, with the
//! `DKIM-Signature` header fields prepended.
//!
//! Since the signature precedes the message, the body must be retained until
//! signing is complete. Small bodies are kept in memory; with a
//! [`CacheConfig`], larger bodies are moved to a temporary file that is
//! removed again when the output is dropped.
//!
//! # Usage
//!
//! The type [`DkimEngine`] provides the entry point. Create it with one or more
//! [`SignConfig`]s, then either pass a complete message to
//! [`DkimEngine::sign`], or feed chunks to a session obtained from
//! [`DkimEngine::prepare`].
//!
//! ```no_run
//! use dkim_stream::{DkimEngine, SignConfig};
//!
//! # async fn f() -> Result<(), Box<dyn std::error::Error>> {
//! let key = std::fs::read_to_string("private.pem")?;
//! let engine = DkimEngine::new([SignConfig::new("example.com", "sel", key)])?;
//!
//! let signed = engine.sign("From: me@example.com\r\n\r\nHello!\r\n").await?;
//! let bytes = signed.into_bytes().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Signing algorithms *rsa-sha256*, *rsa-sha1* (historic), and
//! *ed25519-sha256* ([RFC 8463]) are supported.
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [RFC 8463]: https://www.rfc-editor.org/rfc/rfc8463

pub mod body_hash;
pub mod cache;
pub mod canonicalize;
pub mod crypto;
pub mod engine;
pub mod header;
mod output;
pub mod parser;
pub mod signer;
mod util;

pub use crate::{
    cache::{CacheConfig, DEFAULT_CACHE_THRESHOLD},
    crypto::{HashAlgorithm, SigningKey},
    engine::{DkimEngine, MessageSource, Signing},
    header::HeaderLine,
    output::SignedMessage,
    signer::{
        relaxed_headers, sign, RelaxedHeaders, SignConfig, SignerError, DEFAULT_SIGN_FIELD_NAMES,
    },
    util::{encode_base64, CanonicalStr},
};
