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

//! *Relaxed* canonicalization of header fields and message bodies.

use crate::util::is_wsp;

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

// which state are we in = what did we see last?
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CanonState {
    LineStart,
    Cr,
    Wsp,
    WspCr,
    Byte,
}

/// A body canonicalizer using the *relaxed* body canonicalization algorithm.
///
/// Both CRLF and a lone LF end a line. A stray CR that is not followed by LF is
/// treated like any other byte.
#[derive(Debug)]
pub struct BodyCanonicalizer {
    state: CanonState,
    blank_line: bool,  // whether currently on an empty or blank line
    empty_lines: usize,  // number of empty lines seen but not yet committed
}

impl BodyCanonicalizer {
    pub fn new() -> Self {
        Self {
            state: CanonState::LineStart,
            blank_line: true,
            empty_lines: 0,
        }
    }

    /// Canonicalizes a chunk of body data and returns the output that can be
    /// committed so far.
    pub fn canonicalize_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(bytes.len());

        for &b in bytes {
            match self.state {
                CanonState::LineStart | CanonState::Byte => {
                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b == CR {
                        self.state = CanonState::Cr;
                    } else if b == LF {
                        self.end_line(&mut result);
                    } else {
                        self.flush_empty_lines(&mut result);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Wsp => {
                    if b == CR {
                        self.state = CanonState::WspCr;
                    } else if b == LF {
                        self.end_line(&mut result);
                    } else if !is_wsp(b) {
                        self.flush_empty_lines(&mut result);
                        result.push(SP);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Cr => {
                    if b == LF {
                        self.end_line(&mut result);
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(CR);

                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b != CR {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::WspCr => {
                    if b == LF {
                        self.end_line(&mut result);
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(SP);
                    result.push(CR);

                    if b == CR {
                        self.state = CanonState::Cr;
                    } else if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
            }
        }

        result
    }

    /// Returns the final piece of canonicalized output at end of input.
    pub fn finish(mut self) -> Vec<u8> {
        match self.state {
            CanonState::LineStart => vec![],
            CanonState::Byte => CRLF.to_vec(),  // non-empty body needs final CRLF
            CanonState::Wsp => {
                if self.blank_line {
                    // trailing whitespace-only line is blank: drop
                    vec![]
                } else {
                    CRLF.to_vec()
                }
            }
            CanonState::Cr => {
                let mut result = vec![];
                self.flush_empty_lines(&mut result);
                result.push(CR);
                result.extend(CRLF);
                result
            }
            CanonState::WspCr => {
                let mut result = vec![];
                self.flush_empty_lines(&mut result);
                result.push(SP);
                result.push(CR);
                result.extend(CRLF);
                result
            }
        }
    }

    fn end_line(&mut self, result: &mut Vec<u8>) {
        if self.blank_line {
            self.empty_lines += 1;
        } else {
            result.extend(CRLF);
            self.blank_line = true;
        }
        self.state = CanonState::LineStart;
    }

    // write out remembered empty lines after encountering/before processing
    // byte that ends a section of empty lines
    fn flush_empty_lines(&mut self, result: &mut Vec<u8>) {
        for _ in 0..self.empty_lines {
            result.extend(CRLF);
        }
        self.empty_lines = 0;
        self.blank_line = false;
    }
}

impl Default for BodyCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonicalizes a header field into some result vector, using the *relaxed*
/// header canonicalization algorithm.
///
/// The field name is lower-cased. In the value, line breaks are removed
/// (unfolding), runs of whitespace become a single space, and whitespace at
/// the start and end is removed.
pub fn canonicalize_header(result: &mut Vec<u8>, name: &str, value: &[u8]) {
    result.extend(name.trim().to_ascii_lowercase().bytes());
    result.push(b':');
    canonicalize_header_value(result, value);
}

fn canonicalize_header_value(result: &mut Vec<u8>, value: &[u8]) {
    let start = result.len();
    let mut pending_space = false;

    for &b in value {
        if b == CR || b == LF {
            continue;
        }
        if is_wsp(b) {
            pending_space = true;
        } else {
            if pending_space && result.len() > start {
                result.push(SP);
            }
            pending_space = false;
            result.push(b);
        }
    }
}
