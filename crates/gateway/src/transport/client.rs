//! Pipe client with request/response and automatic reconnect
//!
//! ```text
//!  supervisor: connect ─▶ session (read loop + router) ─▶ disconnect
//!       ▲                                                    │
//!       └──────────── backoff (capped exponential) ◀─────────┘
//! ```
//!
//! When a session ends every pending request fails with
//! `TransportError::ConnectionLost` before reconnection is attempted.

use super::FrameSink;
use super::config::PipeConfig;
use super::connection::{
    ConnectionEvent, ConnectionHandle, ConnectionId, DisconnectReason, run_read_loop, split_stream,
};
use super::endpoint::{self, BoxedStream, endpoint_address};
use crate::error::{GatewayError, TransportError};
use crate::protocol::{Frame, FrameCodec, MessageType};
use crate::router::{PushSubscriber, RequestBroker, RouterStats, run_router};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::ReadHalf;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;

struct ClientShared {
    config: PipeConfig,
    codec: FrameCodec,
    broker: Arc<RequestBroker>,
    current: RwLock<Option<ConnectionHandle>>,
    connected: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    events: broadcast::Sender<ConnectionEvent>,
    next_id: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable client handle
#[derive(Clone)]
pub struct PipeClient {
    shared: Arc<ClientShared>,
}

impl PipeClient {
    pub fn new(config: PipeConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let (connected, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            shared: Arc::new(ClientShared {
                codec: FrameCodec::new(config.max_payload),
                broker: Arc::new(RequestBroker::new(config.push_capacity)),
                current: RwLock::new(None),
                connected,
                shutdown,
                events,
                next_id: AtomicU64::new(1),
                supervisor: Mutex::new(None),
                config,
            }),
        })
    }

    pub fn config(&self) -> &PipeConfig {
        &self.shared.config
    }

    pub fn broker(&self) -> &Arc<RequestBroker> {
        &self.shared.broker
    }

    pub fn stats(&self) -> RouterStats {
        self.shared.broker.stats()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Single connection attempt, no reconnect. The session runs in the
    /// background until the link drops.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let stream = connect_stream(&self.shared).await?;
        let session = Session::attach(&self.shared, stream);
        tokio::spawn(session.run());
        Ok(())
    }

    /// Start the supervisor: connect, and reconnect after every drop until
    /// `stop` is called. Idempotent.
    pub fn start(&self) {
        let mut supervisor = self.shared.supervisor.lock();
        if supervisor.is_none() {
            *supervisor = Some(tokio::spawn(supervise(self.shared.clone())));
        }
    }

    /// Wait until a connection is up
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), GatewayError> {
        let mut rx = self.shared.connected.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|up| *up)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TransportError::Stopped.into()),
            Err(_) => Err(TransportError::ConnectTimeout {
                endpoint: endpoint_address(&self.shared.config.pipe_name),
                timeout,
            }
            .into()),
        }
    }

    /// Fire-and-forget frame (sequence left as given, normally 0)
    pub async fn send(&self, frame: &Frame) -> Result<(), GatewayError> {
        self.send_frame(frame).await
    }

    /// Request with the configured default timeout
    pub async fn request(&self, frame: Frame) -> Result<Frame, GatewayError> {
        self.request_with_timeout(frame, self.shared.config.request_timeout())
            .await
    }

    pub async fn request_with_timeout(
        &self,
        frame: Frame,
        timeout: Duration,
    ) -> Result<Frame, GatewayError> {
        self.shared.broker.request(self, frame, timeout).await
    }

    pub fn subscribe(&self, msg_type: MessageType) -> PushSubscriber {
        self.shared.broker.subscribe(msg_type)
    }

    /// Stop reconnecting, close the link and fail anything still pending
    pub async fn stop(&self) {
        self.shared.shutdown.send_replace(true);
        let current = self.shared.current.read().clone();
        if let Some(handle) = current {
            handle.close().await;
        }
        let supervisor = self.shared.supervisor.lock().take();
        if let Some(task) = supervisor {
            let _ = task.await;
        }
        self.shared.broker.fail_all(TransportError::Stopped);
        info!("Pipe client stopped");
    }
}

#[async_trait]
impl FrameSink for PipeClient {
    async fn send_frame(&self, frame: &Frame) -> Result<(), GatewayError> {
        let handle = self
            .shared
            .current
            .read()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        handle.send(frame).await
    }
}

async fn connect_stream(shared: &ClientShared) -> Result<BoxedStream, GatewayError> {
    let timeout = shared.config.connect_timeout();
    match tokio::time::timeout(timeout, endpoint::connect(&shared.config.pipe_name)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::from(e).into()),
        Err(_) => Err(TransportError::ConnectTimeout {
            endpoint: endpoint_address(&shared.config.pipe_name),
            timeout,
        }
        .into()),
    }
}

/// One connected period of the client
struct Session {
    shared: Arc<ClientShared>,
    id: ConnectionId,
    handle: ConnectionHandle,
    reader: ReadHalf<BoxedStream>,
    inbound: mpsc::Sender<Frame>,
    router: JoinHandle<()>,
}

impl Session {
    /// Publish the connection and start its router. After this returns,
    /// requests go out on the new link.
    fn attach(shared: &Arc<ClientShared>, stream: BoxedStream) -> Self {
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (reader, handle) = split_stream(id, shared.codec, stream);
        let (inbound, rx) = mpsc::channel(shared.config.inbound_capacity);
        let router = tokio::spawn(run_router(shared.broker.clone(), rx, None));

        *shared.current.write() = Some(handle.clone());
        shared.connected.send_replace(true);
        let _ = shared.events.send(ConnectionEvent::Connected(id));
        info!(
            "connected to {} (connection {})",
            endpoint_address(&shared.config.pipe_name),
            id
        );

        Self {
            shared: shared.clone(),
            id,
            handle,
            reader,
            inbound,
            router,
        }
    }

    async fn run(self) -> DisconnectReason {
        let Session {
            shared,
            id,
            handle,
            reader,
            inbound,
            router,
        } = self;

        let reason = run_read_loop(
            id,
            reader,
            shared.codec,
            shared.config.read_timeout(),
            inbound,
            shared.shutdown.subscribe(),
            |frame| frame,
        )
        .await;

        {
            let mut current = shared.current.write();
            if current.as_ref().map(|h| h.id()) == Some(id) {
                *current = None;
            }
        }
        shared.connected.send_replace(false);
        handle.close().await;

        // Let frames already read reach their waiters before failing the rest
        let _ = router.await;
        shared.broker.fail_all(TransportError::ConnectionLost);

        warn!("connection {} lost: {}", id, reason);
        let _ = shared.events.send(ConnectionEvent::Disconnected {
            id,
            reason: reason.to_string(),
        });
        reason
    }
}

async fn supervise(shared: Arc<ClientShared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let base = shared.config.reconnect_delay();
    let max = shared.config.reconnect_max_delay();
    let mut delay = base;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let failed = match connect_stream(&shared).await {
            Ok(stream) => {
                delay = base;
                let reason = Session::attach(&shared, stream).run().await;
                if reason == DisconnectReason::Shutdown {
                    break;
                }
                false
            }
            Err(e) => {
                debug!("connect failed: {}; retrying in {:?}", e, delay);
                true
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if failed {
            delay = (delay * 2).min(max);
        }
    }
    debug!("client supervisor exited");
}
