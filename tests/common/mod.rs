use dkim_stream::{
    canonicalize, crypto, parser::MessageParser, relaxed_headers, DkimEngine, HashAlgorithm,
    HeaderLine, SignConfig, SignedMessage,
};
use rsa::{pkcs8::DecodePublicKey, Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use std::{fs, io, path::Path};

pub const RSA_KEY_FILE: &str = "tests/keys/rsa2048.pem";
pub const RSA_PKCS1_KEY_FILE: &str = "tests/keys/rsa2048-pkcs1.pem";
pub const RSA_PUBLIC_KEY_FILE: &str = "tests/keys/rsa2048pub.pem";
pub const ED25519_KEY_FILE: &str = "tests/keys/ed25519.pem";

pub fn read_key(file_name: &str) -> String {
    fs::read_to_string(file_name).unwrap()
}

pub fn make_config(domain: &str, selector: &str) -> SignConfig {
    SignConfig::new(domain, selector, read_key(RSA_KEY_FILE))
}

pub fn make_engine() -> DkimEngine {
    DkimEngine::new([make_config("example.com", "sel")]).unwrap()
}

pub async fn sign_chunks(engine: &DkimEngine, chunks: &[&[u8]]) -> SignedMessage {
    let mut session = engine.prepare();
    for c in chunks {
        session.process_chunk(c).await.unwrap();
    }
    session.finish().await.unwrap()
}

/// Returns the output with the first `n` signature header lines removed, given
/// the signatures as produced.
pub fn strip_signatures<'a>(output: &'a [u8], signatures: &[String]) -> &'a [u8] {
    let mut rest = output;
    for sig in signatures {
        let s = format!("{sig}\r\n");
        rest = rest.strip_prefix(s.as_bytes()).expect("signature not at start of output");
    }
    rest
}

/// Parses a message into header lines, for verification.
pub fn header_lines(message: &[u8]) -> Vec<HeaderLine> {
    let mut parser = MessageParser::new();
    let parsed = parser.process_chunk(message);
    match parsed.headers {
        Some(h) => h.lines().to_vec(),
        None => parser.finish().unwrap().lines().to_vec(),
    }
}

fn tag_value<'a>(unfolded: &'a str, name: &str) -> &'a str {
    unfolded
        .split(';')
        .map(|t| t.trim())
        .find_map(|t| t.strip_prefix(name).and_then(|t| t.strip_prefix('=')))
        .expect("tag not found")
}

/// Verifies an RSA signature header against the message header lines, using
/// the test public key. Also returns the *bh=* tag value.
pub fn verify_rsa_signature(signature: &str, lines: &[HeaderLine]) -> String {
    let unfolded = signature.replace("\r\n", "");

    let (without_b, b) = unfolded.rsplit_once("; b=").unwrap();
    let signature_data = crypto_decode(&b.replace(' ', ""));

    let hash_alg = match tag_value(&unfolded, "a") {
        "rsa-sha256" => HashAlgorithm::Sha256,
        "rsa-sha1" => HashAlgorithm::Sha1,
        a => panic!("unexpected algorithm {a}"),
    };

    let h = tag_value(&unfolded, "h");
    let mut data = relaxed_headers(lines, h, "").headers;
    let value = without_b.split_once(':').unwrap().1;
    canonicalize::canonicalize_header(&mut data, "dkim-signature", format!("{value}; b=").as_bytes());

    let data_hash = crypto::digest(hash_alg, &data);

    let public_key = RsaPublicKey::from_public_key_pem(&read_key(RSA_PUBLIC_KEY_FILE)).unwrap();
    let scheme = match hash_alg {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
    };
    public_key.verify(scheme, &data_hash, &signature_data).unwrap();

    tag_value(&unfolded, "bh").to_owned()
}

fn crypto_decode(s: &str) -> Vec<u8> {
    use base64ct::{Base64, Encoding};
    Base64::decode_vec(s).unwrap()
}

pub fn count_files(dir: &Path) -> io::Result<usize> {
    Ok(fs::read_dir(dir)?.count())
}
