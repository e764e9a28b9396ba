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

use crate::util;

// Note: Careful with offsets: formatting works with *characters*, not bytes!

pub const HEADER_NAME: &str = "DKIM-Signature";

/// Width at which the tag list is folded.
pub const LINE_WIDTH: usize = 76;

// The signature value starts after " b=" on its line, so the first piece is
// shorter than the rest.
const FIRST_SIGNATURE_PIECE: usize = 73;
const SIGNATURE_PIECE: usize = 75;

/// The tags of a signature whose *b=* value is not yet known.
pub struct UnsignedDkimSignature<'a> {
    pub algorithm: &'a str,
    pub domain: &'a str,
    pub selector: &'a str,
    pub body_hash: &'a str,
    pub signed_headers: &'a str,
}

impl UnsignedDkimSignature<'_> {
    /// Formats the complete header up to and including the empty *b=* tag,
    /// folded.
    pub fn format_without_signature(&self) -> String {
        let tags = [
            "v=1".to_owned(),
            format!("a={}", self.algorithm),
            "c=relaxed/relaxed".to_owned(),
            format!("d={}", self.domain),
            "q=dns/txt".to_owned(),
            format!("s={}", self.selector),
            format!("bh={}", self.body_hash),
            format!("h={}", self.signed_headers),
        ];

        let line = format!("{HEADER_NAME}: {}", tags.join("; "));

        let mut result = fold_line(&line, LINE_WIDTH);
        result.push_str(";\r\n b=");
        result
    }
}

/// Appends the Base64-encoded signature data to a header produced by
/// [`UnsignedDkimSignature::format_without_signature`].
pub fn insert_signature_data(header: &mut String, signature_data: &[u8]) {
    let s = util::encode_base64(signature_data);
    header.push_str(&fold_signature(&s));
}

/// Folds a single logical line so that pieces are about `width` characters
/// long, with each break placed before the last whitespace in the window.
///
/// Where the window contains no usable whitespace, the line is extended to the
/// end of the word instead, so a piece may exceed the width.
pub fn fold_line(s: &str, width: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();

    let mut result = String::with_capacity(s.len() + s.len() / width * 2 + 2);
    let mut pos = 0;

    while pos < len {
        let end = (pos + width).min(len);
        let window = &chars[pos..end];

        if window.len() < width {
            result.extend(window);
            break;
        }

        let take = match last_whitespace_run(window) {
            Some(i) if i > 0 => i,
            _ => {
                let word_len = chars[end..].iter().take_while(|c| !c.is_whitespace()).count();
                window.len() + word_len
            }
        };

        result.extend(&chars[pos..(pos + take)]);
        pos += take;

        if pos < len {
            result.push_str("\r\n");
        }
    }

    result
}

// Start index of the whitespace run followed only by non-whitespace up to the
// end of `window`.
fn last_whitespace_run(window: &[char]) -> Option<usize> {
    let mut i = window.len();
    while i > 0 && !window[i - 1].is_whitespace() {
        i -= 1;
    }
    if i == 0 {
        return None;
    }
    while i > 0 && window[i - 1].is_whitespace() {
        i -= 1;
    }
    Some(i)
}

fn fold_signature(s: &str) -> String {
    let mut pieces = vec![];

    let (first, mut rest) = split_at_char(s, FIRST_SIGNATURE_PIECE);
    pieces.push(first);

    while !rest.is_empty() {
        let (piece, r) = split_at_char(rest, SIGNATURE_PIECE);
        pieces.push(piece);
        rest = r;
    }

    pieces.join("\r\n ")
}

fn split_at_char(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((i, _)) => s.split_at(i),
        None => (s, ""),
    }
}
