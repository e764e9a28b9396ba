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

//! Splitting of a raw message into header and body.

use crate::header::HeaderLine;
use bstr::ByteSlice;
use std::mem;
use tracing::trace;

/// The header section of a message, as captured by the [`MessageParser`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HeaderSection {
    lines: Vec<HeaderLine>,
    raw: Vec<u8>,
    separator: Vec<u8>,
}

impl HeaderSection {
    fn new(raw: Vec<u8>, separator: Vec<u8>) -> Self {
        let lines = split_header_lines(&raw);
        Self { lines, raw, separator }
    }

    /// The header fields in message order.
    pub fn lines(&self) -> &[HeaderLine] {
        &self.lines
    }

    /// The header bytes exactly as received, excluding the separator line.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The blank line between header and body (`"\r\n"` or `"\n"`), or the
    /// empty slice if the message had no body.
    pub fn separator(&self) -> &[u8] {
        &self.separator
    }
}

/// The result of feeding a chunk to the parser.
#[derive(Debug)]
pub struct ParsedChunk<'a> {
    /// The header section, present exactly once: for the chunk in which the
    /// header/body boundary was found.
    pub headers: Option<HeaderSection>,
    /// The part of the chunk that belongs to the body, unchanged.
    pub body: &'a [u8],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ParseState {
    Header,
    Body,
}

/// An incremental splitter of a message into header lines and body bytes.
///
/// Chunk boundaries may fall anywhere; the parser buffers header bytes until
/// the first empty line (CRLF CRLF, or LF LF) and passes all following bytes
/// through as body.
#[derive(Debug)]
pub struct MessageParser {
    state: ParseState,
    raw: Vec<u8>,
    line_start: usize,  // index into `raw` where the current line begins
}

impl MessageParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Header,
            raw: vec![],
            line_start: 0,
        }
    }

    pub fn process_chunk<'a>(&mut self, chunk: &'a [u8]) -> ParsedChunk<'a> {
        if self.state == ParseState::Body {
            return ParsedChunk { headers: None, body: chunk };
        }

        let mut pos = 0;

        while let Some(i) = chunk[pos..].find_byte(b'\n') {
            let end = pos + i + 1;
            self.raw.extend_from_slice(&chunk[pos..end]);
            pos = end;

            let line = &self.raw[self.line_start..];
            if line == b"\r\n" || line == b"\n" {
                let separator = self.raw.split_off(self.line_start);
                let raw = mem::take(&mut self.raw);
                self.state = ParseState::Body;

                let headers = HeaderSection::new(raw, separator);
                trace!("parsed header section with {} fields", headers.lines.len());

                return ParsedChunk {
                    headers: Some(headers),
                    body: &chunk[pos..],
                };
            }

            self.line_start = self.raw.len();
        }

        self.raw.extend_from_slice(&chunk[pos..]);

        ParsedChunk { headers: None, body: &[] }
    }

    /// Signals end of input. Returns the header section if it has not been
    /// produced yet, in which case the whole input was header and the body is
    /// empty.
    pub fn finish(self) -> Option<HeaderSection> {
        match self.state {
            ParseState::Body => None,
            ParseState::Header => {
                trace!("no header/body boundary in message, treating all input as header");
                Some(HeaderSection::new(self.raw, vec![]))
            }
        }
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

// A line starting with WSP continues the preceding field, except for the very
// first line, which always starts a field.
fn split_header_lines(raw: &[u8]) -> Vec<HeaderLine> {
    let mut result = vec![];
    let mut field_start = 0;
    let mut offset = 0;

    for line in raw.lines_with_terminator() {
        if offset > 0 && !line.starts_with(b" ") && !line.starts_with(b"\t") {
            result.push(HeaderLine::new(strip_line_terminator(&raw[field_start..offset])));
            field_start = offset;
        }
        offset += line.len();
    }

    if offset > field_start {
        result.push(HeaderLine::new(strip_line_terminator(&raw[field_start..offset])));
    }

    result
}

fn strip_line_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
