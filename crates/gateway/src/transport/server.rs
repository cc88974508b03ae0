//! Pipe server: a bounded number of connections on one endpoint
//!
//! One acceptor task takes every incoming client and hands it a slot permit.
//! When all `max_connections` permits are out the client is accepted and
//! closed straight away, so it sees the link drop and backs off instead of
//! waiting in the listen backlog. A session returns its permit when it ends.
//! Frames from every connection land on one bounded inbound channel, tagged
//! with the connection they arrived on.

use super::config::PipeConfig;
use super::connection::{
    ConnectionEvent, ConnectionHandle, ConnectionId, run_read_loop, split_stream,
};
use super::endpoint::{BoxedStream, PipeListener, endpoint_address};
use crate::error::{GatewayError, TransportError};
use crate::protocol::{Frame, FrameCodec};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

const ACCEPT_RETRY: Duration = Duration::from_millis(100);
const EVENT_CAPACITY: usize = 64;

/// A frame received by the server and the connection to answer on
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub connection: ConnectionHandle,
    pub frame: Frame,
}

impl InboundFrame {
    /// Reply on the originating connection
    pub async fn reply(&self, frame: Frame) -> Result<(), GatewayError> {
        self.connection.send(&frame).await
    }
}

struct ServerShared {
    config: PipeConfig,
    codec: FrameCodec,
    connections: DashMap<ConnectionId, ConnectionHandle>,
    next_id: AtomicU64,
    refused: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: watch::Sender<bool>,
}

pub struct PipeServer {
    shared: Arc<ServerShared>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    address: String,
}

impl PipeServer {
    /// Bind the endpoint and start the acceptor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: PipeConfig) -> Result<(Self, mpsc::Receiver<InboundFrame>), GatewayError> {
        config.validate()?;
        // One spare instance so a client beyond capacity can be accepted and turned away
        let listener =
            PipeListener::bind(&config.pipe_name, config.max_connections + 1, config.buffer_size)
                .map_err(TransportError::from)?;
        let address = endpoint_address(&config.pipe_name);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new(ServerShared {
            codec: FrameCodec::new(config.max_payload),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            refused: AtomicU64::new(0),
            events,
            shutdown,
            config,
        });

        let slots = Arc::new(Semaphore::new(shared.config.max_connections));
        let acceptor = tokio::spawn(run_acceptor(listener, shared.clone(), inbound_tx, slots));

        info!(
            "Pipe server listening on {} with {} slots",
            address, shared.config.max_connections
        );
        Ok((
            Self {
                shared,
                acceptor: Mutex::new(Some(acceptor)),
                address,
            },
            inbound_rx,
        ))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &PipeConfig {
        &self.shared.config
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.shared.connections.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Clients closed on arrival because every slot was busy
    pub fn refused_count(&self) -> u64 {
        self.shared.refused.load(Ordering::Relaxed)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub async fn send(&self, id: ConnectionId, frame: &Frame) -> Result<(), GatewayError> {
        let handle = self
            .shared
            .connections
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(TransportError::NotConnected)?;
        handle.send(frame).await
    }

    /// Send `frame` to every connected client. Returns how many received it.
    pub async fn broadcast(&self, frame: &Frame) -> usize {
        let handles: Vec<ConnectionHandle> = self
            .shared
            .connections
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let mut delivered = 0;
        for handle in handles {
            match handle.send(frame).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!("broadcast to conn {} failed: {}", handle.id(), e),
            }
        }
        delivered
    }

    /// Close one connection and release its slot
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        match self.shared.connections.get(&id).map(|e| e.value().clone()) {
            Some(handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }

    /// Stop accepting, close every connection and wait for the sessions to exit
    pub async fn stop(&self) {
        self.shared.shutdown.send_replace(true);
        let handles: Vec<ConnectionHandle> = self
            .shared
            .connections
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for handle in handles {
            handle.close().await;
        }
        let acceptor = self.acceptor.lock().take();
        if let Some(acceptor) = acceptor {
            let _ = acceptor.await;
        }
        info!("Pipe server on {} stopped", self.address);
    }
}

async fn run_acceptor(
    listener: PipeListener,
    shared: Arc<ServerShared>,
    inbound: mpsc::Sender<InboundFrame>,
    slots: Arc<Semaphore>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut sessions = JoinSet::new();
    loop {
        while sessions.try_join_next().is_some() {}
        if *shutdown.borrow() || inbound.is_closed() {
            break;
        }
        let stream = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY).await;
                    continue;
                }
            },
        };

        let permit = match slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                shared.refused.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "all {} connection slots busy, turning a client away",
                    shared.config.max_connections
                );
                drop(stream);
                continue;
            }
        };
        sessions.spawn(serve_connection(
            stream,
            shared.clone(),
            inbound.clone(),
            permit,
        ));
    }
    while sessions.join_next().await.is_some() {}
    debug!("acceptor exited");
}

async fn serve_connection(
    stream: BoxedStream,
    shared: Arc<ServerShared>,
    inbound: mpsc::Sender<InboundFrame>,
    _permit: OwnedSemaphorePermit,
) {
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    let (reader, handle) = split_stream(id, shared.codec, stream);
    shared.connections.insert(id, handle.clone());
    let _ = shared.events.send(ConnectionEvent::Connected(id));
    info!("accepted connection {}", id);

    let conn = handle.clone();
    let reason = run_read_loop(
        id,
        reader,
        shared.codec,
        shared.config.read_timeout(),
        inbound,
        shared.shutdown.subscribe(),
        move |frame| InboundFrame {
            connection: conn.clone(),
            frame,
        },
    )
    .await;

    shared.connections.remove(&id);
    handle.close().await;
    info!("connection {} closed: {}", id, reason);
    let _ = shared.events.send(ConnectionEvent::Disconnected {
        id,
        reason: reason.to_string(),
    });
}
