// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bus-facing seam of the client.
//!
//! The board talks to the outside world through [`UpdateSender`] only, so
//! tests can swap the transport for an in-process recorder. The real
//! transport is [`BusConnector`]: a Unix-socket connection to the hub with
//! a writer task for outbound packets and a reader task that decodes
//! inbound frames and hands envelopes to every attached sink.

use slate_proto::wire::{Packet, WireError};
use slate_proto::UpdateEnvelope;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Transport failures between board and hub.
#[derive(Debug, Error)]
pub enum CommError {
    /// Framing or CBOR failure.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    /// The connection (or its writer task) is gone.
    #[error("connection closed")]
    Closed,
    /// Socket-level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound seam: anything that can carry an envelope towards the hub.
pub trait UpdateSender: Send + Sync {
    /// Queue one envelope for delivery.
    fn send_update(&self, env: &UpdateEnvelope) -> Result<(), CommError>;
}

/// Inbound seam: receives every envelope the hub broadcasts to us.
pub trait EnvelopeSink: Send + Sync {
    /// Called from the connector's dispatcher task, one envelope at a time
    /// in arrival order.
    fn on_envelope(&self, env: &UpdateEnvelope);
}

type SharedSinks = Arc<Mutex<Vec<Arc<dyn EnvelopeSink>>>>;

/// Connection to the whiteboard hub.
pub struct BusConnector {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    sinks: SharedSinks,
}

impl BusConnector {
    /// Connect to the hub socket at `path` and spawn the pump tasks on the
    /// current tokio runtime.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, CommError> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        let (reader, writer) = stream.into_split();
        let (outbound, outbox) = mpsc::unbounded_channel::<Vec<u8>>();
        let sinks: SharedSinks = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(pump_outbound(writer, outbox));
        tokio::spawn(pump_inbound(reader, Arc::clone(&sinks)));

        Ok(Self { outbound, sinks })
    }

    /// Register a sink for inbound envelopes.
    pub fn attach(&self, sink: Arc<dyn EnvelopeSink>) {
        lock_sinks(&self.sinks).push(sink);
    }

    /// Cheap cloneable sender handle for a board.
    pub fn handle(&self) -> BusHandle {
        BusHandle {
            outbound: self.outbound.clone(),
        }
    }
}

/// Cloneable outbound handle produced by [`BusConnector::handle`].
#[derive(Debug, Clone)]
pub struct BusHandle {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl UpdateSender for BusHandle {
    fn send_update(&self, env: &UpdateEnvelope) -> Result<(), CommError> {
        let pkt = Packet::encode(env)?;
        self.outbound.send(pkt).map_err(|_| CommError::Closed)
    }
}

fn lock_sinks(sinks: &SharedSinks) -> std::sync::MutexGuard<'_, Vec<Arc<dyn EnvelopeSink>>> {
    sinks.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn pump_outbound(
    mut writer: tokio::net::unix::OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(pkt) = outbox.recv().await {
        if writer.write_all(&pkt).await.is_err() {
            break;
        }
    }
}

async fn pump_inbound(mut reader: tokio::net::unix::OwnedReadHalf, sinks: SharedSinks) {
    let mut read_buf = vec![0u8; 16 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(32 * 1024);
    loop {
        let n = match reader.read(&mut read_buf).await {
            Ok(0) => {
                debug!("hub closed the connection");
                return;
            }
            Ok(n) => n,
            Err(err) => {
                warn!(?err, "read from hub failed");
                return;
            }
        };
        acc.extend_from_slice(&read_buf[..n]);

        // drain as many complete frames as the buffer holds
        loop {
            match Packet::decode(&acc) {
                Ok((env, used)) => {
                    acc.drain(..used);
                    let current: Vec<Arc<dyn EnvelopeSink>> = lock_sinks(&sinks).clone();
                    for sink in current {
                        sink.on_envelope(&env);
                    }
                }
                Err(WireError::IncompleteLength | WireError::IncompleteFrame { .. }) => break,
                Err(err) => {
                    warn!(?err, "dropping hub connection on undecodable frame");
                    return;
                }
            }
        }
    }
}
