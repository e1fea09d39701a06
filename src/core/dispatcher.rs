//! Request/reply correlation for RTVI commands.
//!
//! The dispatcher keeps a table of in-flight requests keyed by message id.
//!
//! Flow:
//! 1. `dispatch()` registers the request and forwards it to the transport
//! 2. The caller awaits the returned [`PendingReply`]
//! 3. The session routes inbound replies to `resolve()` or `reject()`
//! 4. Requests older than the horizon are settled with a timeout, either by
//!    the sweep that runs on every dispatch or by the session's sweep task
//!
//! Every pending request is settled exactly once: replied, rejected,
//! suppressed, timed out, or cancelled.
//!
//! The dispatcher is not synchronized itself; the session keeps it behind the
//! same lock as the session state.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::messages::Message;
use super::transport::Transport;
use crate::errors::{RtviError, RtviResult};

/// Default age after which an unanswered request is dropped.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Reply Types
// =============================================================================

/// Successful settlement of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The bot answered the request
    Message(Message),
    /// The bot answered with an error the caller asked not to surface
    Suppressed(Message),
}

impl Reply {
    pub fn message(&self) -> &Message {
        match self {
            Reply::Message(m) | Reply::Suppressed(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Reply::Message(m) | Reply::Suppressed(m) => m,
        }
    }

    #[inline]
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Reply::Suppressed(_))
    }
}

type Settlement = RtviResult<Reply>;

/// Future returned by [`MessageDispatcher::dispatch`].
///
/// Resolves once the request is settled. Dropping it abandons interest in the
/// reply; the table entry is still removed by the reply or by the sweep.
#[derive(Debug)]
pub struct PendingReply {
    id: String,
    receiver: oneshot::Receiver<Settlement>,
}

impl PendingReply {
    /// Id of the request this reply belongs to.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = RtviResult<Reply>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(settlement)) => Poll::Ready(settlement),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RtviError::RequestCancelled {
                id: this.id.clone(),
                reason: "dispatcher dropped".to_string(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Result of offering an inbound message to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    /// A pending request consumed the message
    Settled,
    /// No pending request has this id
    Unmatched(Message),
}

// =============================================================================
// Dispatcher
// =============================================================================

struct PendingRequest {
    message: Message,
    created_at: Instant,
    sender: oneshot::Sender<Settlement>,
    should_reject: bool,
}

/// Counters for settled requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub dispatched: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub suppressed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

/// Correlates outbound requests with inbound replies.
pub struct MessageDispatcher {
    transport: Arc<dyn Transport>,
    horizon: Duration,
    pending: HashMap<String, PendingRequest>,
    stats: DispatcherStats,
}

impl MessageDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_horizon(transport, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Dispatcher dropping requests older than `horizon`.
    pub fn with_horizon(transport: Arc<dyn Transport>, horizon: Duration) -> Self {
        Self {
            transport,
            horizon,
            pending: HashMap::new(),
            stats: DispatcherStats::default(),
        }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Register a request, forward it to the transport and sweep expired entries.
    ///
    /// A request whose id is already in flight, whose id is empty or whose label
    /// is not `rtvi-ai` is refused without being sent.
    /// When `should_reject` is false, an error reply settles the request as
    /// [`Reply::Suppressed`] instead of failing it.
    pub fn dispatch(&mut self, message: Message, should_reject: bool) -> RtviResult<PendingReply> {
        message.ensure_rtvi()?;
        if message.id.is_empty() {
            return Err(RtviError::InvalidMessage(format!(
                "{} request has an empty id",
                message.message_type
            )));
        }
        if self.pending.contains_key(&message.id) {
            warn!(id = %message.id, message_type = %message.message_type, "Refusing duplicate in-flight request id");
            return Err(RtviError::DuplicateRequestId(message.id));
        }

        let id = message.id.clone();
        let (sender, receiver) = oneshot::channel();

        let request = self.pending.entry(id.clone()).or_insert(PendingRequest {
            message,
            created_at: Instant::now(),
            sender,
            should_reject,
        });
        if let Err(e) = self.transport.send_message(&request.message) {
            warn!(id = %id, error = %e, "Failed to forward request to transport");
            self.pending.remove(&id);
            return Err(e);
        }

        debug!(id = %id, message_type = %request.message.message_type, should_reject, "Dispatched request");
        self.stats.dispatched += 1;

        self.sweep_expired();

        Ok(PendingReply { id, receiver })
    }

    /// Settle the request matching `message.id` with the message as its reply.
    pub fn resolve(&mut self, message: Message) -> Routing {
        match self.pending.remove(&message.id) {
            Some(request) => {
                debug!(
                    id = %message.id,
                    request_type = %request.message.message_type,
                    reply_type = %message.message_type,
                    elapsed_ms = request.created_at.elapsed().as_millis() as u64,
                    "Resolved request"
                );
                self.stats.resolved += 1;
                let _ = request.sender.send(Ok(Reply::Message(message)));
                Routing::Settled
            }
            None => Routing::Unmatched(message),
        }
    }

    /// Settle the request matching `message.id` with an error reply.
    ///
    /// Fails the request if it was dispatched with `should_reject`, otherwise
    /// settles it as [`Reply::Suppressed`].
    pub fn reject(&mut self, message: Message) -> Routing {
        match self.pending.remove(&message.id) {
            Some(request) => {
                let settlement = if request.should_reject {
                    debug!(id = %message.id, reply_type = %message.message_type, "Rejected request");
                    self.stats.rejected += 1;
                    Err(RtviError::ErrorResponse(message))
                } else {
                    debug!(id = %message.id, reply_type = %message.message_type, "Suppressed error reply");
                    self.stats.suppressed += 1;
                    Ok(Reply::Suppressed(message))
                };
                let _ = request.sender.send(settlement);
                Routing::Settled
            }
            None => Routing::Unmatched(message),
        }
    }

    /// Settle a request by id with an arbitrary outcome.
    ///
    /// Returns false if the id is not pending.
    pub fn complete(&mut self, id: &str, outcome: RtviResult<Reply>) -> bool {
        match self.pending.remove(id) {
            Some(request) => {
                let _ = request.sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Settle every request older than the horizon with a timeout.
    ///
    /// Returns the number of requests removed.
    pub fn sweep_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, r)| now.duration_since(r.created_at) >= self.horizon)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(request) = self.pending.remove(id) {
                warn!(
                    id = %id,
                    message_type = %request.message.message_type,
                    horizon_ms = self.horizon.as_millis() as u64,
                    "Dropping expired request"
                );
                let _ = request.sender.send(Err(RtviError::RequestTimeout {
                    id: id.clone(),
                    horizon: self.horizon,
                }));
            }
        }
        self.stats.timed_out += expired.len() as u64;
        expired.len()
    }

    /// Settle every pending request as cancelled.
    pub fn cancel_all(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for (id, request) in self.pending.drain() {
            let _ = request.sender.send(Err(RtviError::RequestCancelled {
                id,
                reason: reason.to_string(),
            }));
        }
        if count > 0 {
            debug!(count, reason, "Cancelled pending requests");
        }
        self.stats.cancelled += count as u64;
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }
}
