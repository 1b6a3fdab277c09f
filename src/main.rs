use bytes::{Buf, BytesMut};
use clap::Parser;
use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing_subscriber::EnvFilter;

use config::{Args, Config};
use loader::LoadOutcome;
use resp_value::RespValue;
use state::State;

mod command;
mod config;
mod error;
mod length;
mod loader;
mod rdb;
mod replica;
mod resp_value;
mod state;
mod store;
mod string;

const ADDRESS: Ipv4Addr = Ipv4Addr::LOCALHOST;
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

async fn handle_connection(mut stream: TcpStream, state: Arc<State>) {
    let mut input_buf = BytesMut::with_capacity(512);
    let mut output_buf = BytesMut::with_capacity(512);
    loop {
        match stream.read_buf(&mut input_buf).await {
            Ok(0) => {
                tracing::debug!("Connection closed");
                break;
            }
            Ok(_) => {
                // A read may carry several pipelined requests, or only part
                // of one.
                output_buf.clear();
                loop {
                    match RespValue::deserialize(&input_buf) {
                        Ok(Some((request, bytes_read))) => {
                            input_buf.advance(bytes_read);
                            state.handle_request(request).serialize(&mut output_buf);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Failed to deserialize request: {:#}", e);
                            RespValue::SimpleError(format!("ERR Protocol error: {}", e))
                                .serialize(&mut output_buf);
                            input_buf.clear();
                            break;
                        }
                    }
                }
                if let Err(e) = stream.write_all(&output_buf).await {
                    tracing::warn!("Stream write error: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Stream read error: {}", e);
                break;
            }
        }
    }
}

fn init_tracing(loglevel: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(loglevel));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.loglevel);

    let state = Arc::new(State::new(Config::from_args(&args)));
    // The snapshot is fully loaded before any connection is accepted
    match state.restore() {
        LoadOutcome::Complete { entries } | LoadOutcome::Partial { entries } => {
            tracing::info!("Restored {} snapshot entries", entries)
        }
        LoadOutcome::Missing | LoadOutcome::Unreadable => {
            tracing::info!("Starting with an empty store")
        }
    }

    if let Some(replicaof) = args.replicaof.clone() {
        // Runs alongside the listener so a silent master can't hold up startup
        tokio::spawn(async move {
            if let Err(e) = replica::handshake(&replicaof, replica::HANDSHAKE_TIMEOUT).await {
                tracing::error!("Replication handshake failed: {:#}", e);
            }
        });
    }

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if sweeper.store().is_empty() {
                continue;
            }
            let purged = sweeper.store().purge_expired();
            if purged > 0 {
                tracing::debug!("Purged {} expired keys", purged);
            }
        }
    });

    let listener = TcpListener::bind(SocketAddrV4::new(ADDRESS, args.port)).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);
        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(stream, state).await;
        });
    }
}
