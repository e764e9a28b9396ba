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

//! Header selection and signature production.

mod format;
mod sign;

pub use self::sign::{relaxed_headers, sign, RelaxedHeaders};

use crate::crypto::HashAlgorithm;
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    io,
};

/// Header fields signed by default, colon-separated.
pub const DEFAULT_SIGN_FIELD_NAMES: &str = "From:Sender:Reply-To:Subject:Date:Message-ID:To:\
    Cc:MIME-Version:Content-Type:Content-Transfer-Encoding:Content-ID:Content-Description:\
    Resent-Date:Resent-From:Resent-Sender:Resent-To:Resent-Cc:Resent-Message-ID:\
    In-Reply-To:References:List-Id:List-Help:List-Unsubscribe:List-Subscribe:List-Post:\
    List-Owner:List-Archive";

/// Configuration for one signature.
#[derive(Clone, Eq, PartialEq)]
pub struct SignConfig {
    /// The signing domain, in Unicode or ASCII form.
    pub domain_name: String,
    pub key_selector: String,
    /// The private key in PEM format, either PKCS#8 or PKCS#1.
    pub private_key: String,
    pub hash_algorithm: HashAlgorithm,
    /// Colon-separated names of the header fields to sign.
    pub sign_field_names: String,
    /// Colon-separated names of header fields never to sign.
    pub skip_field_names: String,
}

impl SignConfig {
    /// Creates a configuration with the default hash algorithm and header
    /// field selection.
    pub fn new(
        domain_name: impl Into<String>,
        key_selector: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            domain_name: domain_name.into(),
            key_selector: key_selector.into(),
            private_key: private_key.into(),
            hash_algorithm: Default::default(),
            sign_field_names: DEFAULT_SIGN_FIELD_NAMES.into(),
            skip_field_names: String::new(),
        }
    }
}

impl Debug for SignConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignConfig")
            .field("domain_name", &self.domain_name)
            .field("key_selector", &self.key_selector)
            .field("private_key", &"<redacted>")
            .field("hash_algorithm", &self.hash_algorithm)
            .field("sign_field_names", &self.sign_field_names)
            .field("skip_field_names", &self.skip_field_names)
            .finish()
    }
}

/// An error that terminates a signing operation.
#[derive(Debug)]
pub enum SignerError {
    /// The body cache file could not be created or written.
    Cache(io::Error),
    /// Reading the message input failed.
    Io(io::Error),
    InvalidKey,
    /// The key type cannot be combined with the configured hash algorithm.
    UnsupportedAlgorithm,
    InvalidDomain,
    SigningFailure,
    EmptyConfigs,
    /// Input was offered to a signing session that has already failed.
    Terminated,
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache(e) => write!(f, "body cache failure: {e}"),
            Self::Io(e) => write!(f, "could not read message: {e}"),
            Self::InvalidKey => write!(f, "invalid signing key"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported signing algorithm"),
            Self::InvalidDomain => write!(f, "invalid signing domain"),
            Self::SigningFailure => write!(f, "signing failed"),
            Self::EmptyConfigs => write!(f, "no signing configurations"),
            Self::Terminated => write!(f, "signing already terminated"),
        }
    }
}

impl Error for SignerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Cache(e) | Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
