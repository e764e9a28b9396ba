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

//! Representation of email header data.

use bstr::ByteSlice;
use std::fmt::{self, Debug, Formatter};

/// A header field as it appeared in the message.
///
/// The line is kept exactly as received, including the line breaks and
/// indentation of any folded continuation lines, but without the line
/// terminator that ends the field. The key is the field name, trimmed and
/// lower-cased; it is empty when the line contains no colon at all.
#[derive(Clone, Eq, PartialEq)]
pub struct HeaderLine {
    key: Box<str>,
    line: Box<[u8]>,
}

impl HeaderLine {
    /// Creates a header line from the raw bytes of a (possibly folded) field.
    pub fn new(line: impl Into<Box<[u8]>>) -> Self {
        let line = line.into();
        let key = match line.find_byte(b':') {
            Some(i) => line[..i].trim().to_str_lossy().to_ascii_lowercase(),
            None => String::new(),
        };
        Self {
            key: key.into(),
            line,
        }
    }

    /// The lower-cased field name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The raw bytes of the field as received.
    pub fn line(&self) -> &[u8] {
        &self.line
    }

    /// The raw bytes following the first colon, or the empty slice when there
    /// is no colon.
    pub fn value(&self) -> &[u8] {
        match self.line.find_byte(b':') {
            Some(i) => &self.line[(i + 1)..],
            None => &[],
        }
    }
}

impl From<&str> for HeaderLine {
    fn from(line: &str) -> Self {
        Self::new(line.as_bytes())
    }
}

impl Debug for HeaderLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderLine")
            .field("key", &self.key)
            .field("line", &self.line.as_bstr())
            .finish()
    }
}
