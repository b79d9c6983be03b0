//! On-device agent: serves one client over one socket, translating protocol
//! requests into POSIX filesystem syscalls.

#[cfg(unix)]
fn main() -> std::io::Result<()> {
    use clap::Parser;
    use nandroid_bridge::agent;
    use nandroid_bridge::protocol::AGENT_READY_MARKER;
    use nandroid_bridge::wire::{FrameReader, FrameWriter};
    use std::net::TcpListener;

    #[derive(Parser)]
    #[command(name = "nandroid-agentd")]
    struct Args {
        /// TCP port to listen on for the single incoming host connection.
        #[arg(long, default_value_t = 8626)]
        port: u16,

        /// Mount root used for GetDiskStats.
        #[arg(long, default_value = "/sdcard")]
        mount_root: String,
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(("0.0.0.0", args.port))?;
    println!("{AGENT_READY_MARKER}");

    let (stream, peer) = listener.accept()?;
    stream.set_nodelay(true)?;
    tracing::info!(%peer, "host connected");

    let read_half = stream.try_clone()?;
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(stream);

    agent::run_handshake(&mut reader, &mut writer)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    agent::serve(reader, writer, &args.mount_root)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

#[cfg(not(unix))]
fn main() {
    eprintln!("nandroid-agentd only runs on unix-like targets (it is meant for Android)");
    std::process::exit(1);
}
