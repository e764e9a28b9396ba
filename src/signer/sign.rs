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

use crate::{
    canonicalize,
    crypto::{self, HashAlgorithm, KeyType, SigningKey},
    header::HeaderLine,
    signer::{
        format::{self, UnsignedDkimSignature},
        SignConfig, SignerError,
    },
    util::{self, CanonicalStr},
};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// The canonicalized header fields selected for signing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RelaxedHeaders {
    /// Canonicalized header fields, each terminated with CRLF.
    pub headers: Vec<u8>,
    /// Colon-separated names of the included fields, for the *h=* tag.
    pub field_names: String,
}

/// Selects and canonicalizes the header fields to sign.
///
/// A field is included when its name is in `sign_field_names` and not in
/// `skip_field_names`; both are colon-separated and compared
/// case-insensitively. Each field name is included once, at the position
/// where it first occurs, with the value of its bottom-most instance.
pub fn relaxed_headers(
    header_lines: &[HeaderLine],
    sign_field_names: &str,
    skip_field_names: &str,
) -> RelaxedHeaders {
    let skip: HashSet<_> = util::split_field_names(skip_field_names).collect();
    let include: HashSet<_> = util::split_field_names(sign_field_names)
        .filter(|name| !skip.contains(name))
        .collect();

    // the last instance of every included field name wins
    let mut bottom_most = HashMap::new();
    for line in header_lines.iter().filter(|l| include.contains(l.key())) {
        bottom_most.insert(line.key(), line);
    }

    let mut result = RelaxedHeaders::default();
    let mut seen = HashSet::new();

    for line in header_lines {
        let key = line.key();
        if !seen.insert(key) {
            continue;
        }
        if let Some(instance) = bottom_most.get(key) {
            canonicalize::canonicalize_header(&mut result.headers, key, instance.value());
            result.headers.extend(b"\r\n");

            if !result.field_names.is_empty() {
                result.field_names.push(':');
            }
            result.field_names.push_str(key);
        }
    }

    result
}

/// Produces a folded `DKIM-Signature` header for a message, given its header
/// lines and the Base64-encoded body hash.
///
/// The returned header has no final line terminator.
pub fn sign(
    header_lines: &[HeaderLine],
    hash_alg: HashAlgorithm,
    body_hash: &str,
    config: &SignConfig,
) -> Result<String, SignerError> {
    let signing_key = SigningKey::from_pem(&config.private_key).map_err(|e| {
        trace!("could not read signing key: {e}");
        SignerError::InvalidKey
    })?;

    let algorithm = signing_algorithm(signing_key.key_type(), hash_alg)?;

    let domain = idna::domain_to_ascii(config.domain_name.trim()).map_err(|_| {
        trace!("cannot convert domain {:?} to ASCII form", config.domain_name);
        SignerError::InvalidDomain
    })?;
    if domain.is_empty() {
        return Err(SignerError::InvalidDomain);
    }

    let canonicalized = relaxed_headers(
        header_lines,
        &config.sign_field_names,
        &config.skip_field_names,
    );

    let sig = UnsignedDkimSignature {
        algorithm,
        domain: &domain,
        selector: config.key_selector.trim(),
        body_hash,
        signed_headers: &canonicalized.field_names,
    };

    let mut formatted_header = sig.format_without_signature();

    let data_hash = compute_data_hash(hash_alg, canonicalized.headers, &formatted_header);

    let signature_data = sign_hash(&signing_key, hash_alg, &data_hash)?;

    format::insert_signature_data(&mut formatted_header, &signature_data);

    Ok(formatted_header)
}

fn signing_algorithm(
    key_type: KeyType,
    hash_alg: HashAlgorithm,
) -> Result<&'static str, SignerError> {
    match (key_type, hash_alg) {
        (KeyType::Rsa, HashAlgorithm::Sha256) => Ok("rsa-sha256"),
        (KeyType::Rsa, HashAlgorithm::Sha1) => Ok("rsa-sha1"),
        (KeyType::Ed25519, HashAlgorithm::Sha256) => Ok("ed25519-sha256"),
        (key_type, hash_alg) => {
            trace!(
                "no signing algorithm for {} key with {hash_alg}",
                key_type.canonical_str()
            );
            Err(SignerError::UnsupportedAlgorithm)
        }
    }
}

// The signature header itself is the last input, with the b= tag value empty
// and without a final CRLF.
fn compute_data_hash(
    hash_alg: HashAlgorithm,
    mut headers: Vec<u8>,
    formatted_header: &str,
) -> Box<[u8]> {
    let value = formatted_header
        .split_once(':')
        .map_or(formatted_header, |(_, v)| v);

    canonicalize::canonicalize_header(&mut headers, format::HEADER_NAME, value.as_bytes());

    crypto::digest(hash_alg, &headers)
}

fn sign_hash(
    signing_key: &SigningKey,
    hash_alg: HashAlgorithm,
    data_hash: &[u8],
) -> Result<Vec<u8>, SignerError> {
    match signing_key {
        SigningKey::Rsa(k) => match crypto::sign_rsa(hash_alg, k, data_hash) {
            Ok(s) => {
                trace!("RSA signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("RSA signing failed: {e}");
                Err(SignerError::SigningFailure)
            }
        },
        SigningKey::Ed25519(k) => match crypto::sign_ed25519(k, data_hash) {
            Ok(s) => {
                trace!("Ed25519 signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("Ed25519 signing failed: {e}");
                Err(SignerError::SigningFailure)
            }
        },
    }
}
