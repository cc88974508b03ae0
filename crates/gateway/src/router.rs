//! Request/response correlation and push fan-out
//!
//! ```text
//!  caller ──request()──▶ pending[seq] ──write──▶ pipe
//!                            ▲
//!  pipe ──read loop──▶ inbound mpsc ──router──┤ response: remove pending[seq], complete
//!                                             ├ push:     broadcast to subscribers of type
//!                                             └ request:  forward to request sink
//! ```
//!
//! A pending entry is registered before the request is written, so a fast
//! response can never miss it. Whoever removes the entry first (router,
//! timeout path or `fail_all`) owns the outcome, which makes the result
//! exactly-once.

use crate::error::{GatewayError, TransportError};
use crate::protocol::{FLAG_RESPONSE, Frame, MessageType, PUSH_SEQUENCE};
use crate::transport::FrameSink;
use dashmap::DashMap;
use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

pub type RequestOutcome = Result<Frame, GatewayError>;

/// An outstanding request awaiting its response
#[derive(Debug)]
pub struct PendingRequest {
    pub sequence: u32,
    pub msg_type: MessageType,
    pub issued_at: Instant,
    pub deadline: Instant,
    completion: oneshot::Sender<RequestOutcome>,
}

/// What the router did with an inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Response matched a pending request
    Completed(u32),
    /// Response for a sequence that already timed out or completed
    Stale(u32),
    /// Push delivered to this many subscribers
    Pushed { msg_type: MessageType, receivers: usize },
    /// Peer-initiated request, to be handled by the caller
    Request(Frame),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub issued: u64,
    pub completed: u64,
    pub stale: u64,
    pub timed_out: u64,
    pub failed: u64,
    pub pushed: u64,
    pub unobserved_pushes: u64,
}

#[derive(Default)]
struct Counters {
    issued: AtomicU64,
    completed: AtomicU64,
    stale: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    pushed: AtomicU64,
    unobserved_pushes: AtomicU64,
}

/// Correlates responses with requests and fans pushes out by message type
pub struct RequestBroker {
    next_sequence: AtomicU32,
    pending: DashMap<u32, PendingRequest>,
    subscribers: DashMap<MessageType, broadcast::Sender<Frame>>,
    push_capacity: usize,
    counters: Counters,
}

impl RequestBroker {
    pub fn new(push_capacity: usize) -> Self {
        Self {
            next_sequence: AtomicU32::new(1),
            pending: DashMap::new(),
            subscribers: DashMap::new(),
            push_capacity: push_capacity.max(1),
            counters: Counters::default(),
        }
    }

    /// Next non-zero sequence not currently outstanding
    pub fn next_sequence(&self) -> u32 {
        loop {
            let seq = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            if seq != PUSH_SEQUENCE && !self.pending.contains_key(&seq) {
                return seq;
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            issued: c.issued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            pushed: c.pushed.load(Ordering::Relaxed),
            unobserved_pushes: c.unobserved_pushes.load(Ordering::Relaxed),
        }
    }

    /// Send `frame` as a request through `sink` and wait for its response.
    ///
    /// Resolves exactly once: with the response, with `Rejected` for an error
    /// response, with `RequestTimeout`, or with the transport failure.
    pub async fn request<S>(&self, sink: &S, frame: Frame, timeout: Duration) -> RequestOutcome
    where
        S: FrameSink + ?Sized,
    {
        let sequence = self.next_sequence();
        let frame = Frame {
            sequence,
            flags: frame.flags & !FLAG_RESPONSE,
            ..frame
        };

        let (tx, mut rx) = oneshot::channel();
        let issued_at = Instant::now();
        self.pending.insert(
            sequence,
            PendingRequest {
                sequence,
                msg_type: frame.msg_type,
                issued_at,
                deadline: issued_at + timeout,
                completion: tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            sequence,
        };
        self.counters.issued.fetch_add(1, Ordering::Relaxed);

        sink.send_frame(&frame).await?;
        trace!("request {} seq={} sent", frame.msg_type, sequence);

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::ConnectionLost.into()),
            Err(_) => {
                if self.pending.remove(&sequence).is_some() {
                    self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "request {} seq={} timed out after {:?}",
                        frame.msg_type, sequence, timeout
                    );
                    Err(GatewayError::RequestTimeout { sequence, timeout })
                } else {
                    // Claimed by the router or fail_all; the outcome is in flight
                    rx.await
                        .unwrap_or(Err(TransportError::ConnectionLost.into()))
                }
            }
        }
    }

    /// Route one inbound frame
    pub fn dispatch(&self, frame: Frame) -> Dispatch {
        if frame.is_response() {
            let sequence = frame.sequence;
            let Some((_, pending)) = self.pending.remove(&sequence) else {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                debug!("dropping stale {} seq={}", frame.msg_type, sequence);
                return Dispatch::Stale(sequence);
            };

            trace!(
                "seq={} {} answered in {:?}",
                sequence,
                pending.msg_type,
                pending.issued_at.elapsed()
            );
            let outcome = if frame.is_error() {
                Err(GatewayError::Rejected(frame.error_message()))
            } else {
                Ok(frame)
            };
            // Receiver gone means the caller was dropped; nothing to report
            let _ = pending.completion.send(outcome);
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
            return Dispatch::Completed(sequence);
        }

        if frame.is_request() {
            return Dispatch::Request(frame);
        }

        let msg_type = frame.msg_type;
        let receivers = match self.subscribers.get(&msg_type) {
            Some(tx) => tx.send(frame).unwrap_or(0),
            None => 0,
        };
        self.counters.pushed.fetch_add(1, Ordering::Relaxed);
        if receivers == 0 {
            self.counters.unobserved_pushes.fetch_add(1, Ordering::Relaxed);
            trace!("push {} has no subscribers", msg_type);
        }
        Dispatch::Pushed {
            msg_type,
            receivers,
        }
    }

    /// Complete every outstanding request with `error`. Returns how many.
    pub fn fail_all(&self, error: TransportError) -> usize {
        let sequences: Vec<u32> = self.pending.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for sequence in sequences {
            if let Some((_, pending)) = self.pending.remove(&sequence) {
                let _ = pending.completion.send(Err(error.clone().into()));
                failed += 1;
            }
        }
        if failed > 0 {
            self.counters
                .failed
                .fetch_add(failed as u64, Ordering::Relaxed);
            info!("failed {} pending requests: {}", failed, error);
        }
        failed
    }

    /// Subscribe to unsolicited frames of one type
    pub fn subscribe(&self, msg_type: MessageType) -> PushSubscriber {
        let rx = self
            .subscribers
            .entry(msg_type)
            .or_insert_with(|| broadcast::channel(self.push_capacity).0)
            .subscribe();
        PushSubscriber {
            msg_type,
            rx,
            skipped: 0,
        }
    }
}

struct PendingGuard<'a> {
    pending: &'a DashMap<u32, PendingRequest>,
    sequence: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.sequence);
    }
}

/// Receiver of pushes of a single message type
pub struct PushSubscriber {
    msg_type: MessageType,
    rx: broadcast::Receiver<Frame>,
    skipped: u64,
}

impl PushSubscriber {
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    /// Pushes lost because this subscriber fell behind
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Wait for the next push, skipping over any the subscriber lagged behind on
    pub async fn next(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Ok(frame),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.skipped += n;
                    warn!("{} subscriber lagged, skipped {} pushes", self.msg_type, n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TransportError::ChannelClosed);
                }
            }
        }
    }

    pub fn try_next(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => return Ok(Some(frame)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.skipped += n;
                    continue;
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(TransportError::ChannelClosed);
                }
            }
        }
    }
}

/// Drain `inbound` through `broker` until the channel closes.
///
/// Peer-initiated requests go to `requests` when given, and are dropped
/// with a warning otherwise.
pub async fn run_router(
    broker: Arc<RequestBroker>,
    mut inbound: mpsc::Receiver<Frame>,
    requests: Option<mpsc::Sender<Frame>>,
) {
    while let Some(frame) = inbound.recv().await {
        if let Dispatch::Request(frame) = broker.dispatch(frame) {
            match &requests {
                Some(tx) => {
                    if tx.send(frame).await.is_err() {
                        warn!("request sink closed, dropping inbound request");
                    }
                }
                None => warn!(
                    "no handler for inbound request {} seq={}",
                    frame.msg_type, frame.sequence
                ),
            }
        }
    }
    debug!("router stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Sink that records frames instead of writing them
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Frame>>,
        fail: bool,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, frame: &Frame) -> Result<(), GatewayError> {
            if self.fail {
                return Err(TransportError::NotConnected.into());
            }
            self.sent.lock().push(frame.clone());
            Ok(())
        }
    }

    impl RecordingSink {
        fn last_sequence(&self) -> Option<u32> {
            self.sent.lock().last().map(|f| f.sequence)
        }
    }

    async fn wait_for_send(sink: &RecordingSink) -> u32 {
        loop {
            if let Some(seq) = sink.last_sequence() {
                return seq;
            }
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_sequence_skips_zero() {
        let broker = RequestBroker::new(8);
        broker.next_sequence.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(broker.next_sequence(), u32::MAX);
        assert_eq!(broker.next_sequence(), 1);
    }

    #[tokio::test]
    async fn test_response_completes_request() {
        let broker = Arc::new(RequestBroker::new(8));
        let sink = Arc::new(RecordingSink::default());

        let task = {
            let broker = broker.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                broker
                    .request(
                        sink.as_ref(),
                        Frame::new(MessageType::OrderRequest, vec![]),
                        Duration::from_secs(5),
                    )
                    .await
            })
        };

        let seq = wait_for_send(&sink).await;
        assert_eq!(broker.pending_count(), 1);
        let response = Frame::response(seq, MessageType::OrderAck, b"ok".to_vec());
        assert_eq!(broker.dispatch(response.clone()), Dispatch::Completed(seq));

        assert_eq!(task.await.unwrap().unwrap(), response);
        assert_eq!(broker.pending_count(), 0);

        // Second response with the same sequence is dropped
        assert_eq!(broker.dispatch(response), Dispatch::Stale(seq));
        assert_eq!(broker.stats().stale, 1);
    }

    #[tokio::test]
    async fn test_error_response_is_rejected() {
        let broker = Arc::new(RequestBroker::new(8));
        let sink = Arc::new(RecordingSink::default());
        let task = {
            let (broker, sink) = (broker.clone(), sink.clone());
            tokio::spawn(async move {
                broker
                    .request(
                        sink.as_ref(),
                        Frame::new(MessageType::OrderCancel, vec![]),
                        Duration::from_secs(5),
                    )
                    .await
            })
        };
        let seq = wait_for_send(&sink).await;
        broker.dispatch(Frame::error_response(seq, "원주문번호가 존재하지 않습니다"));
        assert_eq!(
            task.await.unwrap(),
            Err(GatewayError::Rejected("원주문번호가 존재하지 않습니다".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_is_stale() {
        let broker = RequestBroker::new(8);
        let sink = RecordingSink::default();
        let result = broker
            .request(
                &sink,
                Frame::new(MessageType::BatchCandleRequest, vec![]),
                Duration::from_millis(200),
            )
            .await;
        let seq = sink.last_sequence().unwrap();
        assert_eq!(
            result,
            Err(GatewayError::RequestTimeout {
                sequence: seq,
                timeout: Duration::from_millis(200)
            })
        );
        assert_eq!(broker.pending_count(), 0);
        assert_eq!(
            broker.dispatch(Frame::response(seq, MessageType::BatchCandleResponse, vec![])),
            Dispatch::Stale(seq)
        );
        assert_eq!(broker.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_send_failure_clears_pending() {
        let broker = RequestBroker::new(8);
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let result = broker
            .request(
                &sink,
                Frame::new(MessageType::OrderRequest, vec![]),
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(
            result,
            Err(GatewayError::Transport(TransportError::NotConnected))
        );
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let broker = Arc::new(RequestBroker::new(8));
        let sink = Arc::new(RecordingSink::default());
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let (broker, sink) = (broker.clone(), sink.clone());
            tasks.push(tokio::spawn(async move {
                broker
                    .request(
                        sink.as_ref(),
                        Frame::new(MessageType::OrderRequest, vec![]),
                        Duration::from_secs(30),
                    )
                    .await
            }));
        }
        while broker.pending_count() < 3 || sink.sent.lock().len() < 3 {
            tokio::task::yield_now().await;
        }

        assert_eq!(broker.fail_all(TransportError::ConnectionLost), 3);
        for task in tasks {
            assert_eq!(
                task.await.unwrap(),
                Err(GatewayError::Transport(TransportError::ConnectionLost))
            );
        }
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_caller_removes_entry() {
        let broker = Arc::new(RequestBroker::new(8));
        let sink = Arc::new(RecordingSink::default());
        let task = {
            let (broker, sink) = (broker.clone(), sink.clone());
            tokio::spawn(async move {
                broker
                    .request(
                        sink.as_ref(),
                        Frame::new(MessageType::OrderRequest, vec![]),
                        Duration::from_secs(30),
                    )
                    .await
            })
        };
        wait_for_send(&sink).await;
        task.abort();
        let _ = task.await;
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_push_fan_out() {
        let broker = RequestBroker::new(8);
        let mut ticks_a = broker.subscribe(MessageType::RealtimeTick);
        let mut ticks_b = broker.subscribe(MessageType::RealtimeTick);
        let mut execs = broker.subscribe(MessageType::RealtimeExec);

        let tick = Frame::new(MessageType::RealtimeTick, vec![1, 2, 3]);
        assert_eq!(
            broker.dispatch(tick.clone()),
            Dispatch::Pushed {
                msg_type: MessageType::RealtimeTick,
                receivers: 2
            }
        );
        assert_eq!(ticks_a.next().await.unwrap(), tick);
        assert_eq!(ticks_b.next().await.unwrap(), tick);
        assert_eq!(execs.try_next().unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_without_subscribers() {
        let broker = RequestBroker::new(8);
        assert_eq!(
            broker.dispatch(Frame::new(MessageType::RealtimeBalance, vec![])),
            Dispatch::Pushed {
                msg_type: MessageType::RealtimeBalance,
                receivers: 0
            }
        );
        assert_eq!(broker.stats().unobserved_pushes, 1);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips() {
        let broker = RequestBroker::new(2);
        let mut sub = broker.subscribe(MessageType::RealtimeTick);
        for i in 0..5u8 {
            broker.dispatch(Frame::new(MessageType::RealtimeTick, vec![i]));
        }
        let frame = sub.next().await.unwrap();
        assert_eq!(frame.payload, vec![3]);
        assert_eq!(sub.skipped(), 3);
    }

    #[tokio::test]
    async fn test_router_forwards_requests() {
        let broker = Arc::new(RequestBroker::new(8));
        let (in_tx, in_rx) = mpsc::channel(8);
        let (req_tx, mut req_rx) = mpsc::channel(8);
        let router = tokio::spawn(run_router(broker, in_rx, Some(req_tx)));

        let request = Frame::new(MessageType::SubscribeRequest, vec![]).with_sequence(9);
        in_tx.send(request.clone()).await.unwrap();
        assert_eq!(req_rx.recv().await.unwrap(), request);

        drop(in_tx);
        router.await.unwrap();
    }
}
