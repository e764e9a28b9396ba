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

//! The signing pipeline.

use crate::{
    body_hash::RelaxedBody,
    cache::{BodyStore, CacheConfig},
    output::SignedMessage,
    parser::{HeaderSection, MessageParser},
    signer::{self, SignConfig, SignerError},
};
use std::{
    fmt::{self, Debug, Formatter},
    io::{self, Cursor},
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// The message to sign.
pub enum MessageSource {
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    Bytes(Vec<u8>),
    Text(String),
}

impl MessageSource {
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::Stream(Box::new(reader))
    }

    fn into_reader(self) -> Box<dyn AsyncRead + Send + Unpin> {
        match self {
            Self::Stream(reader) => reader,
            Self::Bytes(bytes) => Box::new(Cursor::new(bytes)),
            Self::Text(s) => Box::new(Cursor::new(s.into_bytes())),
        }
    }
}

impl Debug for MessageSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::Text(s) => write!(f, "Text({} bytes)", s.len()),
        }
    }
}

impl From<Vec<u8>> for MessageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for MessageSource {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<String> for MessageSource {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for MessageSource {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

/// A DKIM signer for messages, producing one signature per configuration.
#[derive(Clone, Debug)]
pub struct DkimEngine {
    configs: Vec<SignConfig>,  // non-empty
    cache: Option<CacheConfig>,
}

impl DkimEngine {
    pub fn new<I>(configs: I) -> Result<Self, SignerError>
    where
        I: IntoIterator<Item = SignConfig>,
    {
        let configs: Vec<_> = configs.into_iter().collect();

        if configs.is_empty() {
            return Err(SignerError::EmptyConfigs);
        }

        Ok(Self {
            configs,
            cache: None,
        })
    }

    /// Moves message bodies larger than the configured threshold to temporary
    /// files while signing.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Starts an incremental signing session.
    pub fn prepare(&self) -> Signing<'_> {
        let (first, rest) = self.configs.split_first().expect("no signing configurations");

        let mut body = RelaxedBody::new(first.hash_algorithm);
        for config in rest {
            body = body.with_hash_algorithm(config.hash_algorithm);
        }
        let body = body.with_store(BodyStore::new(self.cache.clone()));

        Signing {
            configs: &self.configs,
            stage: Stage::Idle,
            parser: MessageParser::new(),
            headers: None,
            body,
        }
    }

    /// Reads and signs a complete message.
    ///
    /// The output is available only after the whole input has been consumed
    /// and all signatures have been computed. On error, no output is produced.
    pub async fn sign(
        &self,
        input: impl Into<MessageSource>,
    ) -> Result<SignedMessage, SignerError> {
        let mut reader = input.into().into_reader();
        let mut session = self.prepare();

        let mut buf = vec![0; READ_BUFFER_SIZE];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("could not read message input: {e}");
                    return Err(SignerError::Io(e));
                }
            };

            session.process_chunk(&buf[..n]).await?;
        }

        session.finish().await
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Idle,
    Reading,
    AwaitingJoin,
    Signing,
    Emitting,
    Errored,
}

/// An incremental signing session, created with [`DkimEngine::prepare`].
///
/// Dropping the session discards all retained data, including any cache file.
pub struct Signing<'a> {
    configs: &'a [SignConfig],
    stage: Stage,
    parser: MessageParser,
    headers: Option<HeaderSection>,
    body: RelaxedBody,
}

impl Signing<'_> {
    /// Whether the body has been moved to a cache file so far.
    pub fn using_cache(&self) -> bool {
        self.body.using_cache()
    }

    /// Processes the next chunk of the raw message.
    ///
    /// After an error, the session is terminated and rejects further input.
    pub async fn process_chunk(&mut self, chunk: &[u8]) -> Result<(), SignerError> {
        match self.stage {
            Stage::Errored => return Err(SignerError::Terminated),
            Stage::Idle => self.set_stage(Stage::Reading),
            _ => {}
        }

        let parsed = self.parser.process_chunk(chunk);

        if let Some(headers) = parsed.headers {
            self.headers = Some(headers);
        }

        if !parsed.body.is_empty() {
            if let Err(e) = self.body.process_chunk(parsed.body).await {
                debug!("could not retain message body: {e}");
                self.set_stage(Stage::Errored);
                return Err(SignerError::Cache(e));
            }
        }

        Ok(())
    }

    /// Completes the input and produces the signed message.
    pub async fn finish(mut self) -> Result<SignedMessage, SignerError> {
        if self.stage == Stage::Errored {
            return Err(SignerError::Terminated);
        }

        self.set_stage(Stage::AwaitingJoin);

        let headers = match self.headers.take() {
            Some(headers) => headers,
            None => self.parser.finish().unwrap_or_default(),
        };

        let mut body_results = self.body.finish().await.map_err(|e| {
            debug!("could not complete message body: {e}");
            SignerError::Cache(e)
        })?;

        trace!("signing stage {:?} -> {:?}", self.stage, Stage::Signing);
        self.stage = Stage::Signing;

        let mut signatures = Vec::with_capacity(self.configs.len());

        for config in self.configs {
            let body_hash = body_results
                .get_base64(config.hash_algorithm)
                .expect("requested body hash result not available");

            match signer::sign(headers.lines(), config.hash_algorithm, &body_hash, config) {
                Ok(signature) => {
                    trace!("produced signature for domain {:?}", config.domain_name);
                    signatures.push(signature);
                }
                Err(e) => {
                    debug!("signing for domain {:?} failed: {e}", config.domain_name);
                    return Err(e);
                }
            }
        }

        let mut prefix = vec![];
        for signature in &signatures {
            prefix.extend(signature.as_bytes());
            prefix.extend(b"\r\n");
        }
        prefix.extend(headers.raw());
        prefix.extend(headers.separator());

        let body = body_results
            .take_retained()
            .expect("message body not retained");

        debug!("signed message with {} signature(s)", signatures.len());
        trace!("signing stage {:?} -> {:?}", self.stage, Stage::Emitting);

        Ok(SignedMessage::new(signatures, prefix, body))
    }

    fn set_stage(&mut self, stage: Stage) {
        trace!("signing stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HashAlgorithm;

    const RSA_KEY: &str = include_str!("../tests/keys/rsa2048.pem");

    fn make_engine() -> DkimEngine {
        DkimEngine::new([SignConfig::new("example.com", "sel", RSA_KEY)]).unwrap()
    }

    #[test]
    fn new_rejects_empty_configs() {
        let result = DkimEngine::new([]);

        assert!(matches!(result, Err(SignerError::EmptyConfigs)));
    }

    #[tokio::test]
    async fn session_terminates_after_cache_error() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = CacheConfig::new(dir.path().join("missing"));
        cache.threshold = 0;

        let engine = make_engine().with_cache(cache);
        let mut session = engine.prepare();

        session.process_chunk(b"From: me\r\n\r\n").await.unwrap();

        let error = session.process_chunk(b"body").await.unwrap_err();
        assert!(matches!(error, SignerError::Cache(_)));

        let error = session.process_chunk(b"more").await.unwrap_err();
        assert!(matches!(error, SignerError::Terminated));

        let error = session.finish().await.unwrap_err();
        assert!(matches!(error, SignerError::Terminated));
    }

    #[tokio::test]
    async fn sign_string_input() {
        let engine = make_engine();

        let signed = engine.sign("From: me@example.com\r\n\r\nHello\r\n").await.unwrap();

        assert_eq!(signed.signatures().len(), 1);
        assert!(signed.signatures()[0].contains(" h=from;"));
        assert!(!signed.using_cache());
    }

    #[tokio::test]
    async fn session_registers_all_hash_algorithms() {
        let mut c1 = SignConfig::new("example.com", "one", RSA_KEY);
        c1.hash_algorithm = HashAlgorithm::Sha1;
        let c2 = SignConfig::new("example.com", "two", RSA_KEY);

        let engine = DkimEngine::new([c1, c2]).unwrap();

        let signed = engine.sign(&b"From: me\r\n\r\n"[..]).await.unwrap();

        let sigs = signed.signatures();
        assert!(sigs[0].contains("a=rsa-sha1;"));
        assert!(sigs[0].contains("bh=2jmj7l5rSw0yVb/vlWAYkK/YBwk=;"));
        assert!(sigs[1].contains("a=rsa-sha256;"));
    }
}
