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

use crate::cache::RetainedBody;
use std::{
    io::{self, Cursor},
    pin::Pin,
    task::{ready, Context, Poll},
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tracing::trace;

/// A signed message: the signature header lines followed by the original
/// message bytes.
///
/// Read it through its [`AsyncRead`] implementation. Dropping it removes the
/// body cache file, if one was used.
#[derive(Debug)]
pub struct SignedMessage {
    signatures: Vec<String>,
    prefix: Cursor<Vec<u8>>,
    prefix_done: bool,
    body: RetainedBody,
    done: bool,
}

impl SignedMessage {
    pub(crate) fn new(signatures: Vec<String>, prefix: Vec<u8>, body: RetainedBody) -> Self {
        Self {
            signatures,
            prefix: Cursor::new(prefix),
            prefix_done: false,
            body,
            done: false,
        }
    }

    /// Whether the body is streamed from a cache file.
    pub fn using_cache(&self) -> bool {
        self.body.using_cache()
    }

    /// The `DKIM-Signature` headers prepended to the message, without final
    /// line terminator.
    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }

    /// Writes the complete signed message to a writer, returning the number of
    /// bytes written.
    pub async fn write_to<W>(mut self, writer: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        tokio::io::copy(&mut self, writer).await
    }

    /// Reads the complete signed message into memory.
    pub async fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut result = vec![];
        self.read_to_end(&mut result).await?;
        Ok(result)
    }
}

impl AsyncRead for SignedMessage {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.prefix_done {
            let before = buf.filled().len();
            ready!(Pin::new(&mut this.prefix).poll_read(cx, buf))?;
            if buf.filled().len() > before || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            this.prefix_done = true;
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.body).poll_read(cx, buf))?;

        if buf.filled().len() == before && buf.remaining() > 0 && !this.done {
            this.done = true;
            trace!("signing stage Emitting -> Done");
        }

        Poll::Ready(Ok(()))
    }
}
