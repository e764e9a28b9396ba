use dkim_stream::{CacheConfig, DkimEngine, MessageSource, SignConfig};
use std::{env, process};
use tokio::{fs, io};

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt().with_writer(std::io::stderr).try_init();

    let mut args = env::args();

    let (key_file, domain, selector, cache_dir) = match (
        args.next().as_deref(),
        args.next(),
        args.next(),
        args.next(),
        args.next(),
        args.next(),
    ) {
        (_, Some(key_file), Some(domain), Some(selector), cache_dir, None) => {
            (key_file, domain, selector, cache_dir)
        }
        (program, ..) => {
            eprintln!(
                "usage: {} <key_file> <domain> <selector> [<cache_dir>]",
                program.unwrap_or("dkimsign")
            );
            process::exit(1);
        }
    };

    let private_key = fs::read_to_string(key_file).await.unwrap();

    let mut engine = DkimEngine::new([SignConfig::new(domain, selector, private_key)]).unwrap();
    if let Some(dir) = cache_dir {
        engine = engine.with_cache(CacheConfig::new(dir));
    }

    let signed = match engine.sign(MessageSource::from_reader(io::stdin())).await {
        Ok(signed) => signed,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    if signed.using_cache() {
        eprintln!("message body was cached on disk");
    }

    let mut stdout = io::stdout();
    signed.write_to(&mut stdout).await.unwrap();
}
