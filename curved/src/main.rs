use anyhow::{Context, Result};
use curved::config::{self, ServerConfig};
use curved::{telemetry, Connection, Listener};
use curved_curvecp::SecretKey;
use rand_core::OsRng;
use std::path::Path;
use tokio::signal;
use tracing::{debug, info};

fn main() -> Result<()> {
    let config = config::load()?;
    telemetry::init(&config.log_filter);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: ServerConfig) -> Result<()> {
    let key = load_or_generate_key(&config.key_file)?;

    let listener = Listener::listen(config.bind_addr()?, key)
        .await
        .context("binding curvecp listener")?;
    info!(addr = %listener.local_addr(), "serving");

    tokio::select! {
        _ = accept_loop(&listener) => {}
        _ = signal::ctrl_c() => info!("shutdown signal received"),
    }

    listener.close();
    Ok(())
}

async fn accept_loop(listener: &Listener) {
    while let Ok(conn) = listener.accept().await {
        tokio::spawn(echo(conn));
    }
}

/// The demo application: echo every byte back to the peer.
async fn echo(mut conn: Connection) {
    let mut buf = [0u8; 1024];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let (_, err) = conn.write(&buf[..n]).await;
                if err.is_some() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    debug!(peer = %conn.remote_addr(), "echo session ended");
    conn.close();
}

/// Load the hex-encoded long-term secret key, generating one on first run.
/// The public key is written next to it for distribution to clients.
fn load_or_generate_key(path: &Path) -> Result<[u8; 32]> {
    if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading key file {}", path.display()))?;
        let bytes = hex::decode(text.trim())
            .with_context(|| format!("decoding key file {}", path.display()))?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("key file {} is not 32 bytes", path.display()))?;
        return Ok(key);
    }

    let secret = SecretKey::generate(&mut OsRng);
    std::fs::write(path, hex::encode(secret.to_bytes()))
        .with_context(|| format!("writing key file {}", path.display()))?;
    let public_path = path.with_extension("pub");
    std::fs::write(&public_path, hex::encode(secret.public_key().as_bytes()))
        .with_context(|| format!("writing public key file {}", public_path.display()))?;
    info!(
        key = %path.display(),
        public = %public_path.display(),
        "generated long-term key pair"
    );
    Ok(secret.to_bytes())
}
