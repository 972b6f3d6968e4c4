// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Unix-socket CBOR hub for the Slate whiteboard.
//!
//! Every connection speaks length-prefixed envelope packets. Decoded
//! envelopes run through the broadcast router, which applies them to the
//! authoritative board and answers with a fan-out plan; the hub then
//! pushes the resulting packet into the relevant per-connection outboxes.

use anyhow::Result;
use clap::Parser;
use slate_proto::wire::{Packet, WireError};
use slate_proto::{default_socket_path, UpdateEnvelope};
use slate_server::{
    BoardRouter, CheckpointStore, FsCheckpointStore, MemoryCheckpointStore, RouteTarget,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "slate-hub", about = "Slate whiteboard hub")]
struct Args {
    /// Unix socket path to listen on (defaults to the per-user runtime dir).
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Directory for durable checkpoint blobs. In-memory when omitted.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
}

struct ConnState {
    tx: mpsc::Sender<Vec<u8>>,
}

struct HubState {
    next_conn_id: u64,
    conns: HashMap<u64, ConnState>,
    router: BoardRouter<Box<dyn CheckpointStore + Send>>,
}

impl HubState {
    fn new(store: Box<dyn CheckpointStore + Send>) -> Self {
        Self {
            next_conn_id: 0,
            conns: HashMap::new(),
            router: BoardRouter::new(store),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let socket_path = args.socket.unwrap_or_else(default_socket_path);
    let store: Box<dyn CheckpointStore + Send> = match &args.checkpoint_dir {
        Some(dir) => Box::new(FsCheckpointStore::open(dir)?),
        None => Box::new(MemoryCheckpointStore::new()),
    };

    let hub = Arc::new(Mutex::new(HubState::new(store)));

    // Remove stale socket if present
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    info!("whiteboard hub listening at {}", socket_path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let hub_state = hub.clone();
        tokio::spawn(handle_client(stream, hub_state));
    }
}

async fn handle_client(stream: UnixStream, hub: Arc<Mutex<HubState>>) {
    let (mut reader, writer) = tokio::io::split(stream);

    // allocate conn id and outbox
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
    let conn_id = {
        let mut h = hub.lock().await;
        let id = h.next_conn_id;
        h.next_conn_id += 1;
        h.conns.insert(id, ConnState { tx });
        id
    };

    // writer task
    tokio::spawn(async move {
        let mut ws = writer;
        while let Some(buf) = rx.recv().await {
            if ws.write_all(&buf).await.is_err() {
                break;
            }
        }
    });

    let mut read_buf = vec![0u8; 16 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(32 * 1024);
    'conn: loop {
        let n = match reader.read(&mut read_buf).await {
            Ok(n) => n,
            Err(err) => {
                warn!(?err, conn_id, "read failed");
                break;
            }
        };
        if n == 0 {
            break;
        }
        acc.extend_from_slice(&read_buf[..n]);

        // process as many frames as available
        loop {
            match Packet::decode(&acc) {
                Ok((env, used)) => {
                    acc.drain(..used);
                    handle_envelope(env, conn_id, &hub).await;
                }
                Err(WireError::IncompleteLength | WireError::IncompleteFrame { .. }) => break,
                Err(err) => {
                    warn!(?err, conn_id, "dropping connection on undecodable frame");
                    break 'conn;
                }
            }
        }
    }

    // cleanup connection
    hub.lock().await.conns.remove(&conn_id);
}

// Apply one inbound envelope and fan out whatever the router decided.
// Rejected envelopes are logged and dropped; the connection survives.
async fn handle_envelope(env: UpdateEnvelope, conn_id: u64, hub: &Arc<Mutex<HubState>>) {
    let (pkt, targets) = {
        let mut h = hub.lock().await;
        let out = match h.router.dispatch(env) {
            Ok(Some(out)) => out,
            Ok(None) => return,
            Err(err) => {
                warn!(%err, conn_id, "rejecting envelope");
                return;
            }
        };
        let pkt = match Packet::encode(&out.envelope) {
            Ok(pkt) => pkt,
            Err(err) => {
                warn!(%err, "failed to encode outbound envelope");
                return;
            }
        };
        let targets: Vec<mpsc::Sender<Vec<u8>>> = match out.target {
            RouteTarget::Requester => h
                .conns
                .get(&conn_id)
                .map(|conn| conn.tx.clone())
                .into_iter()
                .collect(),
            RouteTarget::Everyone => h.conns.values().map(|conn| conn.tx.clone()).collect(),
        };
        (pkt, targets)
    };
    for tx in targets {
        let _ = tx.send(pkt.clone()).await;
    }
}
