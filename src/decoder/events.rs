//! Events published by the orchestrator and the routing that produces them.

use crate::error::{DtmfError, Result};
use crate::process::DemodulatorEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};

/// What subscribers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecoderEvent {
    /// One decoded symbol (e.g. `"5"`, `"#"`).
    Symbol { symbol: String },
    /// The demodulator process terminated on its own.
    End { code: Option<i32> },
}

impl DecoderEvent {
    /// Serialize event to a JSON line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// What a collected event means for the decode waiting on it.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Progress {
    Symbol(String),
    /// The demodulator read the pipe to its end and exited cleanly.
    Drained,
}

/// Interprets the next collector item; `None` means the collector was aborted.
pub(crate) fn progress(event: Option<DecoderEvent>) -> Result<Progress> {
    match event {
        Some(DecoderEvent::Symbol { symbol }) => Ok(Progress::Symbol(symbol)),
        Some(DecoderEvent::End { code: Some(0) }) => Ok(Progress::Drained),
        Some(DecoderEvent::End { code }) => Err(DtmfError::DemodulatorFailed { code }),
        None => Err(DtmfError::DecodeAborted),
    }
}

/// Extract the symbol from a demodulator line, if it carries one.
pub fn parse_symbol(line: &str, marker: &str) -> Option<String> {
    line.strip_prefix(marker).map(|rest| rest.trim().to_string())
}

/// Relabels demodulator lines and fans them out to subscribers and to the
/// collectors of pending requests.
///
/// Subscribers see every session; a collector only sees the session it was
/// registered for.
pub(crate) struct EventRouter {
    marker: String,
    events: broadcast::Sender<DecoderEvent>,
    collectors: Mutex<HashMap<u64, Registration>>,
    next_id: AtomicU64,
}

struct Registration {
    session: u64,
    tx: mpsc::UnboundedSender<DecoderEvent>,
}

impl EventRouter {
    pub(crate) fn new(marker: String, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            marker,
            events,
            collectors: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DecoderEvent> {
        self.events.subscribe()
    }

    pub(crate) fn route(&self, event: DemodulatorEvent) {
        let session = event.session();
        let event = match event {
            DemodulatorEvent::Line { line, .. } => match parse_symbol(&line, &self.marker) {
                Some(symbol) => DecoderEvent::Symbol { symbol },
                None => {
                    tracing::trace!("ignoring demodulator line: {}", line);
                    return;
                }
            },
            DemodulatorEvent::Closed { code, .. } => DecoderEvent::End { code },
        };

        for collector in self.lock_collectors().values() {
            if collector.session == session {
                let _ = collector.tx.send(event.clone());
            }
        }
        // Err only means there are no subscribers right now.
        let _ = self.events.send(event);
    }

    /// Starts collecting the events of one demodulator session for one request.
    pub(crate) fn collect(self: &Arc<Self>, session: u64) -> Collector {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_collectors().insert(id, Registration { session, tx });
        Collector {
            id,
            rx,
            router: Arc::clone(self),
        }
    }

    /// Drops every collector so pending requests see their channel close.
    pub(crate) fn abort_collectors(&self) {
        self.lock_collectors().clear();
    }

    #[cfg(test)]
    pub(crate) fn pending_collectors(&self) -> usize {
        self.lock_collectors().len()
    }

    fn lock_collectors(&self) -> MutexGuard<'_, HashMap<u64, Registration>> {
        self.collectors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Subscription scoped to one request; unregisters itself on drop.
pub(crate) struct Collector {
    id: u64,
    rx: mpsc::UnboundedReceiver<DecoderEvent>,
    router: Arc<EventRouter>,
}

impl Collector {
    pub(crate) async fn recv(&mut self) -> Option<DecoderEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued; `Some(None)` once aborted.
    pub(crate) fn try_recv(&mut self) -> Option<Option<DecoderEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Some(Some(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(None),
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.router.lock_collectors().remove(&self.id);
    }
}

/// Feeds one demodulator's events into the router until the demodulator is gone.
pub(crate) async fn route_events(
    mut rx: mpsc::UnboundedReceiver<DemodulatorEvent>,
    router: Arc<EventRouter>,
) {
    while let Some(event) = rx.recv().await {
        router.route(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Arc<EventRouter> {
        Arc::new(EventRouter::new("DTMF: ".to_string(), 16))
    }

    fn line(line: &str) -> DemodulatorEvent {
        DemodulatorEvent::Line {
            session: 1,
            line: line.to_string(),
        }
    }

    fn closed(code: Option<i32>) -> DemodulatorEvent {
        DemodulatorEvent::Closed { session: 1, code }
    }

    fn symbol(s: &str) -> DecoderEvent {
        DecoderEvent::Symbol {
            symbol: s.to_string(),
        }
    }

    #[test]
    fn parse_symbol_strips_marker_and_trims() {
        assert_eq!(parse_symbol("DTMF: 5", "DTMF: "), Some("5".to_string()));
        assert_eq!(parse_symbol("DTMF:  #  ", "DTMF: "), Some("#".to_string()));
        assert_eq!(parse_symbol("multimon-ng 1.3.0", "DTMF: "), None);
        assert_eq!(parse_symbol("Enabled demodulators: DTMF", "DTMF: "), None);
    }

    #[test]
    fn routes_only_marker_lines_in_order() {
        let router = router();
        let mut rx = router.subscribe();

        let lines = [
            "multimon-ng 1.3.0",
            "DTMF: 1",
            "noise",
            "DTMF: 2",
            "DTMF: *",
            "",
            "DTMF: 0",
        ];
        for text in lines {
            router.route(line(text));
        }

        let received: Vec<DecoderEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            received,
            vec![symbol("1"), symbol("2"), symbol("*"), symbol("0")]
        );
    }

    #[test]
    fn closed_becomes_end() {
        let router = router();
        let mut rx = router.subscribe();
        router.route(closed(Some(1)));
        assert_eq!(rx.try_recv().unwrap(), DecoderEvent::End { code: Some(1) });
    }

    #[test]
    fn routing_without_subscribers_is_fine() {
        let router = router();
        router.route(line("DTMF: 9"));
    }

    #[tokio::test]
    async fn collector_receives_events_and_unregisters_on_drop() {
        let router = router();
        let mut collector = router.collect(1);
        assert_eq!(router.pending_collectors(), 1);

        router.route(line("DTMF: 4"));
        router.route(closed(Some(0)));

        assert_eq!(collector.recv().await, Some(symbol("4")));
        assert_eq!(
            collector.recv().await,
            Some(DecoderEvent::End { code: Some(0) })
        );

        drop(collector);
        assert_eq!(router.pending_collectors(), 0);
    }

    #[tokio::test]
    async fn collectors_only_see_events_after_registration() {
        let router = router();
        router.route(line("DTMF: 1"));
        let mut collector = router.collect(1);
        router.route(line("DTMF: 2"));
        assert_eq!(collector.recv().await, Some(symbol("2")));
    }

    #[tokio::test]
    async fn collectors_ignore_other_sessions() {
        let router = router();
        let mut rx = router.subscribe();
        let mut collector = router.collect(2);

        router.route(line("DTMF: 9"));
        router.route(closed(Some(0)));
        router.route(DemodulatorEvent::Line {
            session: 2,
            line: "DTMF: 2".to_string(),
        });

        assert_eq!(collector.recv().await, Some(symbol("2")));
        assert_eq!(collector.try_recv(), None);
        // Subscribers are not scoped to a session
        assert_eq!(rx.try_recv().unwrap(), symbol("9"));
        assert_eq!(rx.try_recv().unwrap(), DecoderEvent::End { code: Some(0) });
        assert_eq!(rx.try_recv().unwrap(), symbol("2"));
    }

    #[tokio::test]
    async fn abort_closes_collectors() {
        let router = router();
        let mut collector = router.collect(1);
        assert_eq!(collector.try_recv(), None);
        router.abort_collectors();
        assert_eq!(collector.try_recv(), Some(None));
        assert_eq!(collector.recv().await, None);
    }

    #[test]
    fn progress_interprets_events() {
        assert_eq!(
            progress(Some(symbol("3"))).unwrap(),
            Progress::Symbol("3".to_string())
        );
        assert_eq!(
            progress(Some(DecoderEvent::End { code: Some(0) })).unwrap(),
            Progress::Drained
        );
        assert!(matches!(
            progress(Some(DecoderEvent::End { code: None })),
            Err(DtmfError::DemodulatorFailed { code: None })
        ));
        assert!(matches!(progress(None), Err(DtmfError::DecodeAborted)));
    }

    #[test]
    fn event_json_shape() {
        assert_eq!(
            symbol("7").to_json().unwrap(),
            r#"{"type":"symbol","symbol":"7"}"#
        );
        assert_eq!(
            DecoderEvent::End { code: Some(0) }.to_json().unwrap(),
            r#"{"type":"end","code":0}"#
        );
    }
}
