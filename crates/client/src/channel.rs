// crates/client/src/channel.rs
//! Shared, long-lived event channel to the analysis server.
//!
//! One [`EventChannel`] is created per process and cloned into every view.
//! Views register handlers by event name and get a [`Subscription`] back;
//! dropping it (or passing it to [`EventChannel::unsubscribe`]) removes
//! exactly that handler and nothing else. Inbound notifications are
//! dispatched in arrival order, after being validated into
//! [`InboundEvent`]s.
//!
//! Frames on the wire are JSON [`Envelope`]s. An envelope carrying an `ack`
//! id answers an earlier [`EventChannel::emit_with_ack`] and is routed to
//! its waiter instead of the handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::{SinkExt, StreamExt};
use nanocas_view_types::{names, InboundEvent, LogLevel, OutboundEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Event channel is closed")]
    Closed,

    #[error("No acknowledgement for {event}: channel closed while waiting")]
    AckDropped { event: &'static str },
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            ack: None,
        }
    }

    fn outbound(event: &OutboundEvent, ack: Option<u64>) -> Self {
        Self {
            event: event.name().to_owned(),
            data: event.payload(),
            ack,
        }
    }

    fn connect_error(message: impl Into<String>) -> Self {
        Self::new(names::CONNECT_ERROR, Value::String(message.into()))
    }
}

type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, Handler)>>,
}

struct Shared {
    registry: Mutex<Registry>,
    pending_acks: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_ack: AtomicU64,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_acks(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending_acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_handler(&self, event: &str, id: u64) -> bool {
        let mut registry = self.registry();
        let Some(list) = registry.handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            registry.handlers.remove(event);
        }
        removed
    }

    fn deliver(&self, envelope: Envelope) {
        if let Some(ack) = envelope.ack {
            if let Some(waiter) = self.pending_acks().remove(&ack) {
                let _ = waiter.send(envelope.data);
                return;
            }
        }

        let event = match InboundEvent::parse(&envelope.event, envelope.data) {
            Ok(event) => event,
            Err(e) => {
                warn!(event = %envelope.event, "dropping malformed notification: {e}");
                return;
            }
        };

        // Snapshot the handler list so handlers may (un)subscribe re-entrantly.
        let handlers: Vec<Handler> = self
            .registry()
            .handlers
            .get(event.name())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        debug!(event = event.name(), handlers = handlers.len(), "dispatching notification");
        for handler in handlers {
            handler(&event);
        }
    }
}

/// Cheap-to-clone handle on the shared channel.
#[derive(Clone)]
pub struct EventChannel {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl EventChannel {
    /// A channel with no transport: outbound frames land in the returned
    /// receiver and inbound frames are fed through [`EventChannel::deliver`].
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            pending_acks: Mutex::new(HashMap::new()),
            next_ack: AtomicU64::new(1),
            outbound,
        });
        (Self { shared }, rx)
    }

    /// Connect to `url` in the background.
    ///
    /// Emissions made before the socket is up are queued. If the connection
    /// fails or drops, a `connect_error` notification is dispatched and the
    /// channel closes; there is no automatic reconnect.
    pub fn connect(url: impl Into<String>) -> Self {
        let (channel, outbound) = Self::pair();
        let url = url.into();
        tokio::spawn(run_transport(url, Arc::downgrade(&channel.shared), outbound));
        channel
    }

    /// Register `handler` for notifications named `event`.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let mut registry = self.shared.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(event.to_owned())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            event: event.to_owned(),
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Remove exactly the handler behind `subscription`.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.shared
            .registry()
            .handlers
            .get(event)
            .map_or(0, Vec::len)
    }

    pub fn emit(&self, event: &OutboundEvent) -> Result<(), ChannelError> {
        debug!(event = event.name(), "emitting");
        self.shared
            .outbound
            .send(Envelope::outbound(event, None))
            .map_err(|_| ChannelError::Closed)
    }

    /// Emit and wait for the server's acknowledgement payload.
    pub async fn emit_with_ack(&self, event: &OutboundEvent) -> Result<Value, ChannelError> {
        let ack = self.shared.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending_acks().insert(ack, tx);

        if self
            .shared
            .outbound
            .send(Envelope::outbound(event, Some(ack)))
            .is_err()
        {
            self.shared.pending_acks().remove(&ack);
            return Err(ChannelError::Closed);
        }

        let waiter = AckWaiter {
            ack,
            shared: &self.shared,
        };
        let result = rx.await.map_err(|_| ChannelError::AckDropped {
            event: event.name(),
        });
        drop(waiter);
        result
    }

    /// Forward a line to the server's log hook. Failures are ignored.
    pub fn log(&self, message: impl Into<String>, level: LogLevel) {
        let _ = self.emit(&OutboundEvent::Log {
            message: message.into(),
            level,
        });
    }

    /// Inbound path: resolve an ack waiter or dispatch to handlers.
    pub fn deliver(&self, envelope: Envelope) {
        self.shared.deliver(envelope);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.outbound.is_closed()
    }
}

/// Drops the pending-ack entry when an `emit_with_ack` future is abandoned.
struct AckWaiter<'a> {
    ack: u64,
    shared: &'a Shared,
}

impl Drop for AckWaiter<'_> {
    fn drop(&mut self) {
        self.shared.pending_acks().remove(&self.ack);
    }
}

/// Registration token. Dropping it unsubscribes the handler.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    event: String,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event", &self.event)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove_handler(&self.event, self.id);
        }
    }
}

// ============================================================================
// WebSocket transport
// ============================================================================

/// Returns false once every channel handle is gone.
fn deliver_weak(shared: &Weak<Shared>, envelope: Envelope) -> bool {
    match shared.upgrade() {
        Some(shared) => {
            shared.deliver(envelope);
            true
        }
        None => false,
    }
}

async fn run_transport(
    url: String,
    shared: Weak<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!(%url, "event channel connect failed: {e}");
            deliver_weak(&shared, Envelope::connect_error(e.to_string()));
            return;
        }
    };
    info!(%url, "event channel connected");

    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(envelope) = frame else {
                    debug!("all channel handles dropped, closing socket");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(event = %envelope.event, "failed to encode frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!("event channel send failed: {e}");
                    deliver_weak(&shared, Envelope::connect_error(e.to_string()));
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => {
                                if !deliver_weak(&shared, envelope) {
                                    break;
                                }
                            }
                            Err(e) => warn!("ignoring unparseable frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%url, "event channel closed by server");
                        deliver_weak(&shared, Envelope::connect_error("connection closed by server"));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("event channel receive failed: {e}");
                        deliver_weak(&shared, Envelope::connect_error(e.to_string()));
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn started(project_id: &str) -> Envelope {
        Envelope::new(names::LISTENER_STARTED, json!({ "projectId": project_id }))
    }

    #[test]
    fn test_dispatch_in_arrival_order() {
        let (channel, _rx) = EventChannel::pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = channel.subscribe(names::LISTENER_STARTED, move |event| {
            sink.lock()
                .unwrap()
                .push(event.project_id().unwrap_or_default().to_owned());
        });

        channel.deliver(started("a"));
        channel.deliver(started("b"));
        channel.deliver(started("c"));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let (channel, _rx) = EventChannel::pair();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        let sub_a = channel.subscribe(names::LISTENER_STARTED, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = Arc::clone(&second);
        let _sub_b = channel.subscribe(names::LISTENER_STARTED, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(channel.handler_count(names::LISTENER_STARTED), 2);

        channel.unsubscribe(sub_a);
        assert_eq!(channel.handler_count(names::LISTENER_STARTED), 1);

        channel.deliver(started("p1"));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (channel, _rx) = EventChannel::pair();
        {
            let _sub = channel.subscribe(names::LISTENER_STOPPED, |_| {});
            assert_eq!(channel.handler_count(names::LISTENER_STOPPED), 1);
        }
        assert_eq!(channel.handler_count(names::LISTENER_STOPPED), 0);
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let (channel, _rx) = EventChannel::pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = channel.subscribe(names::LISTENER_STATUS, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        channel.deliver(Envelope::new(names::LISTENER_STATUS, json!({ "projectId": "p1" })));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        channel.deliver(Envelope::new(
            names::LISTENER_STATUS,
            json!({ "projectId": "p1", "is_running": true }),
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_reentrantly() {
        let (channel, _rx) = EventChannel::pair();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let sub = channel.subscribe(names::LISTENER_STARTED, move |_| {
            inner.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        channel.deliver(started("p1"));
        assert_eq!(channel.handler_count(names::LISTENER_STARTED), 0);
    }

    #[test]
    fn test_emit_frames() {
        let (channel, mut rx) = EventChannel::pair();
        channel
            .emit(&OutboundEvent::CheckListener {
                project_id: "p1".into(),
            })
            .unwrap();
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, names::CHECK_LISTENER);
        assert_eq!(frame.data, json!({ "projectId": "p1" }));
        assert_eq!(frame.ack, None);
    }

    #[test]
    fn test_log_forwarding() {
        let (channel, mut rx) = EventChannel::pair();
        channel.log("coverage poll failed", LogLevel::Warning);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, names::LOG);
        assert_eq!(
            frame.data,
            json!({ "message": "coverage poll failed", "level": "WARNING" })
        );
    }

    #[test]
    fn test_emit_after_close() {
        let (channel, rx) = EventChannel::pair();
        drop(rx);
        assert!(channel.is_closed());
        let err = channel
            .emit(&OutboundEvent::StopListener {
                project_id: "p1".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }

    #[tokio::test]
    async fn test_emit_with_ack_resolves() {
        let (channel, mut rx) = EventChannel::pair();
        let server = channel.clone();
        tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            let mut reply = Envelope::new(frame.event.clone(), json!({ "ok": true }));
            reply.ack = frame.ack;
            server.deliver(reply);
        });

        let reply = channel
            .emit_with_ack(&OutboundEvent::CheckListener {
                project_id: "p1".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply, json!({ "ok": true }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_ack_is_cleaned_up() {
        let (channel, _rx) = EventChannel::pair();
        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            channel.emit_with_ack(&OutboundEvent::CheckListener {
                project_id: "p1".into(),
            }),
        )
        .await;
        assert!(waited.is_err());
        assert!(channel.shared.pending_acks().is_empty());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let frame: Envelope =
            serde_json::from_str(r#"{"event":"fastq_file_listener_stopped","data":{"projectId":"p1"}}"#)
                .unwrap();
        assert_eq!(frame.ack, None);
        let text = serde_json::to_string(&Envelope::new("log", json!({}))).unwrap();
        assert_eq!(text, r#"{"event":"log","data":{}}"#);
    }
}
