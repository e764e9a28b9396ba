pub mod common;

use dkim_stream::{CacheConfig, DkimEngine, MessageSource, SignerError};
use std::{
    io::{self, ErrorKind},
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

fn make_large_message(body_len: usize) -> Vec<u8> {
    let mut message =
        b"From: me@example.com\r\nTo: you@example.com\r\nSubject: large\r\n\r\n".to_vec();

    let line = b"The quick  brown fox jumps over the lazy dog. \t\r\n";
    while message.len() < body_len {
        message.extend(line);
    }
    message.extend(b"\r\n\r\n");
    message
}

/// A reader that yields the message and then fails with a broken pipe.
struct BrokenReader {
    data: Vec<u8>,
    pos: usize,
}

impl AsyncRead for BrokenReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pos == this.data.len() {
            return Poll::Ready(Err(io::Error::new(ErrorKind::BrokenPipe, "connection lost")));
        }

        let n = buf.remaining().min(this.data.len() - this.pos);
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;

        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn large_body_cached_and_uncached_agree() {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir().unwrap();
    let message = make_large_message(3 * 1024 * 1024);

    let uncached = common::make_engine();
    let cached = common::make_engine().with_cache(CacheConfig::new(dir.path()));

    let signed1 = uncached.sign(message.clone()).await.unwrap();
    let signed2 = cached.sign(message.clone()).await.unwrap();

    assert!(!signed1.using_cache());
    assert!(signed2.using_cache());
    assert_eq!(signed1.signatures(), signed2.signatures());
    assert_eq!(common::count_files(dir.path()).unwrap(), 1);

    let signatures = signed2.signatures().to_vec();

    let output1 = signed1.into_bytes().await.unwrap();
    let output2 = signed2.into_bytes().await.unwrap();

    assert_eq!(output1, output2);
    assert_eq!(common::strip_signatures(&output2, &signatures), &message[..]);

    assert_eq!(common::count_files(dir.path()).unwrap(), 0);
}

#[tokio::test]
async fn small_body_not_cached() {
    let dir = tempfile::tempdir().unwrap();

    let engine = common::make_engine().with_cache(CacheConfig::new(dir.path()));

    let signed = engine.sign("From: me\r\n\r\nsmall\r\n").await.unwrap();

    assert!(!signed.using_cache());
    assert_eq!(common::count_files(dir.path()).unwrap(), 0);
}

#[tokio::test]
async fn cache_threshold_boundary() {
    let dir = tempfile::tempdir().unwrap();

    let mut cache = CacheConfig::new(dir.path());
    cache.threshold = 10;
    let engine = common::make_engine().with_cache(cache);

    let signed = engine.sign("From: me\r\n\r\n0123456789").await.unwrap();
    assert!(!signed.using_cache());

    let signed = engine.sign("From: me\r\n\r\n0123456789X").await.unwrap();
    assert!(signed.using_cache());

    let output = signed.into_bytes().await.unwrap();
    assert!(output.ends_with(b"\r\nFrom: me\r\n\r\n0123456789X"));
}

#[tokio::test]
async fn unwritable_cache_dir_fails() {
    let dir = tempfile::tempdir().unwrap();

    let mut cache = CacheConfig::new(dir.path().join("missing"));
    cache.threshold = 16;
    let engine = common::make_engine().with_cache(cache);

    let message = make_large_message(1024);

    let result = engine.sign(message).await;

    match result {
        Err(SignerError::Cache(e)) => assert_eq!(e.kind(), ErrorKind::NotFound),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("signing unexpectedly succeeded"),
    }

    assert_eq!(common::count_files(dir.path()).unwrap(), 0);
}

#[tokio::test]
async fn input_error_removes_cache_file() {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir().unwrap();

    let mut cache = CacheConfig::new(dir.path());
    cache.threshold = 16;
    let engine = common::make_engine().with_cache(cache);

    let reader = BrokenReader {
        data: make_large_message(100 * 1024),
        pos: 0,
    };

    let result = engine.sign(MessageSource::from_reader(reader)).await;

    match result {
        Err(SignerError::Io(e)) => assert_eq!(e.kind(), ErrorKind::BrokenPipe),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("signing unexpectedly succeeded"),
    }

    assert_eq!(common::count_files(dir.path()).unwrap(), 0);
}

#[tokio::test]
async fn cache_file_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();

    let mut cache = CacheConfig::new(dir.path());
    cache.threshold = 16;
    let engine = common::make_engine().with_cache(cache);

    let message = make_large_message(1024);
    let (header, body) = message.split_at(80);

    // session abandoned half-way
    let mut session = engine.prepare();
    session.process_chunk(header).await.unwrap();
    session.process_chunk(body).await.unwrap();
    assert!(session.using_cache());
    assert_eq!(common::count_files(dir.path()).unwrap(), 1);
    drop(session);
    assert_eq!(common::count_files(dir.path()).unwrap(), 0);

    // output never read
    let signed = engine.sign(message.clone()).await.unwrap();
    assert!(signed.using_cache());
    assert_eq!(common::count_files(dir.path()).unwrap(), 1);
    drop(signed);
    assert_eq!(common::count_files(dir.path()).unwrap(), 0);

    // output written out
    let signed = engine.sign(message).await.unwrap();
    let mut sink = vec![];
    let n = signed.write_to(&mut sink).await.unwrap();
    sink.flush().await.unwrap();
    assert_eq!(n as usize, sink.len());
    assert_eq!(common::count_files(dir.path()).unwrap(), 0);
}

#[tokio::test]
async fn concurrent_signings_use_distinct_files() {
    let dir = tempfile::tempdir().unwrap();

    let mut cache = CacheConfig::new(dir.path());
    cache.threshold = 16;
    let engine = common::make_engine().with_cache(cache);

    let m1 = make_large_message(2048);
    let mut m2 = make_large_message(4096);
    m2.extend(b"different\r\n");

    let (s1, s2) = tokio::join!(engine.sign(m1.clone()), engine.sign(m2.clone()));
    let (s1, s2) = (s1.unwrap(), s2.unwrap());

    assert_eq!(common::count_files(dir.path()).unwrap(), 2);

    let sigs1 = s1.signatures().to_vec();
    let sigs2 = s2.signatures().to_vec();
    let o1 = s1.into_bytes().await.unwrap();
    let o2 = s2.into_bytes().await.unwrap();

    assert_eq!(common::strip_signatures(&o1, &sigs1), &m1[..]);
    assert_eq!(common::strip_signatures(&o2, &sigs2), &m2[..]);
}

#[tokio::test]
async fn engine_without_configs() {
    let result = DkimEngine::new(vec![]);

    assert!(matches!(result, Err(SignerError::EmptyConfigs)));
}
