//! Entry point for `arq-over-udp`.
//!
//! Two modes, mirroring the two protocol roles: `send` reads stdin in
//! segment-sized chunks and delivers them reliably to a peer; `recv` binds a
//! port and writes delivered payloads to stdout, in order.  All protocol
//! work is delegated to library modules; this file owns only process setup
//! (logging, argument parsing) and stdio plumbing.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use arq_over_udp::channel::Channel;
use arq_over_udp::config::SessionConfig;
use arq_over_udp::session::{ReceiverHandle, SenderHandle};

/// Reliable, in-order message delivery over lossy UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Read stdin and deliver it reliably to a receiving peer.
    Send {
        /// Receiver address (e.g. 127.0.0.1:9000).
        peer: SocketAddr,
        /// Max concurrent unacked packets.
        #[arg(long, default_value_t = 16)]
        window: usize,
        /// Max payload bytes per packet.
        #[arg(long, default_value_t = 1450)]
        mss: usize,
    },
    /// Receive from a sending peer and write payloads to stdout.
    Recv {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let result = match cli.mode {
        Mode::Send { peer, window, mss } => run_send(peer, window, mss).await,
        Mode::Recv { bind } => run_recv(&bind).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_send(
    peer: SocketAddr,
    window: usize,
    mss: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = SessionConfig {
        window_capacity: window,
        max_segment_size: mss,
        ..SessionConfig::default()
    };
    let channel = Channel::bind("0.0.0.0:0".parse().unwrap()).await?;
    log::info!("sending to {peer} from {}", channel.local_addr());
    let session = SenderHandle::spawn(channel, peer, &config)?;

    let mut stdin = tokio::io::stdin();
    let mut pending = Vec::new();
    let mut chunk = vec![0u8; mss];
    loop {
        let n = stdin.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        pending.push(session.submit(chunk[..n].to_vec()).await?);
    }

    // Collect per-submission results before tearing the session down.
    let mut failures = 0usize;
    for handle in pending {
        if let Err(e) = handle.wait().await {
            log::error!("delivery failed: {e}");
            failures += 1;
        }
    }
    session.finish().await;

    if failures > 0 {
        return Err(format!("{failures} submission(s) not delivered").into());
    }
    log::info!("all data delivered");
    Ok(())
}

async fn run_recv(bind: &str) -> Result<(), Box<dyn std::error::Error>> {
    let channel = Channel::bind(bind.parse()?).await?;
    log::info!("listening on {}", channel.local_addr());
    let mut session = ReceiverHandle::spawn(channel);

    let mut stdout = tokio::io::stdout();
    while let Some(payload) = session.recv().await {
        stdout.write_all(&payload).await?;
        stdout.flush().await?;
    }
    Ok(())
}
