//! Per-connection streaming session.
//!
//! A [`StreamSession`] owns the reassembly buffer, the response log and the
//! lifecycle state of one chat turn. It is driven by transport events
//! (`opened`, `receive`, `transport_error`, `closed`) and by teardown
//! (`cancel`), and never touches a socket itself, so every transition can be
//! exercised with synthetic deliveries.
//!
//! ```text
//! Idle → Connecting → Open → Streaming → Completed
//!                      │        │
//!                      └────────┴──→ Closed | Errored
//! ```

use tracing::{debug, error, info, warn};

use crate::dispatcher::{dispatch, Effect};
use crate::reassembler::{Feed, FrameError, FrameReassembler};
use crate::response::ResponseLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Streaming,
    Completed,
    Closed,
    Errored,
}

/// How the connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    /// Closing handshake with a status code, from either side.
    Clean { code: u16, reason: String },
    /// The transport went away without a closing handshake.
    Unexpected,
    /// Local teardown.
    Cancelled,
    /// Forced closure after a bounds violation or idle timeout.
    Aborted { reason: String },
    /// The socket was never established.
    ConnectFailed { error: String },
}

impl Closure {
    pub fn is_clean(&self) -> bool {
        matches!(self, Closure::Clean { .. } | Closure::Cancelled)
    }
}

/// Observable consequence of driving the session, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Opened,
    Delta(String),
    End,
    MalformedFrame(String),
    TransportError(String),
    Closed(Closure),
}

/// What a renderer needs at any point of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub text: String,
    pub processing: bool,
    pub complete: bool,
    pub state: SessionState,
    pub closure: Option<Closure>,
}

#[derive(Debug)]
pub struct StreamSession {
    state: SessionState,
    reassembler: FrameReassembler,
    log: ResponseLog,
    complete: bool,
    processing: bool,
    cancelled: bool,
    closure: Option<Closure>,
    malformed_frames: usize,
    transport_errors: usize,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::with_reassembler(FrameReassembler::default())
    }
}

impl StreamSession {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self::with_reassembler(FrameReassembler::new(max_frame_bytes))
    }

    fn with_reassembler(reassembler: FrameReassembler) -> Self {
        Self {
            state: SessionState::Idle,
            reassembler,
            log: ResponseLog::new(),
            complete: false,
            processing: false,
            cancelled: false,
            closure: None,
            malformed_frames: 0,
            transport_errors: 0,
        }
    }

    pub fn begin_connect(&mut self) {
        if self.state == SessionState::Idle && !self.cancelled {
            self.state = SessionState::Connecting;
            self.processing = true;
        }
    }

    pub fn opened(&mut self) -> Vec<StreamEvent> {
        if self.cancelled || self.state != SessionState::Connecting {
            return Vec::new();
        }
        self.state = SessionState::Open;
        vec![StreamEvent::Opened]
    }

    /// Feed one transport delivery and dispatch every message it completes.
    pub fn receive(&mut self, chunk: &str) -> Vec<StreamEvent> {
        if !self.accepts_data() {
            debug!(len = chunk.len(), state = ?self.state, "dropping delivery on inactive session");
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut feed = self.reassembler.feed(chunk);
        loop {
            match feed {
                Feed::Message(message) => {
                    match dispatch(message, &mut self.log, &mut self.complete) {
                        Effect::Appended(text) => {
                            if self.state == SessionState::Open {
                                self.state = SessionState::Streaming;
                            }
                            events.push(StreamEvent::Delta(text));
                        }
                        Effect::Completed => {
                            self.state = SessionState::Completed;
                            self.processing = false;
                            events.push(StreamEvent::End);
                        }
                        Effect::Ignored => {}
                    }
                }
                Feed::NeedMoreData => break,
                Feed::Malformed(e) => {
                    let exhausted = e.is_resource_exhaustion();
                    events.push(self.malformed(&e));
                    if exhausted {
                        events.extend(self.abort(e.to_string()));
                        break;
                    }
                }
            }
            feed = self.reassembler.next_frame();
        }
        events
    }

    /// No delivery arrived within the allowed period.
    ///
    /// An incomplete frame is abandoned as malformed; either way the session
    /// is closed.
    pub fn timed_out(&mut self) -> Vec<StreamEvent> {
        if !self.accepts_data() {
            return Vec::new();
        }
        let mut events = Vec::new();
        let reason = match self.reassembler.abandon() {
            Some(e) => {
                events.push(self.malformed(&e));
                e.to_string()
            }
            None => "idle timeout".to_string(),
        };
        events.extend(self.abort(reason));
        events
    }

    pub fn transport_error(&mut self, error: &str) -> Vec<StreamEvent> {
        if self.cancelled || self.closure.is_some() {
            return Vec::new();
        }
        self.transport_errors += 1;
        warn!(%error, "websocket error");
        vec![StreamEvent::TransportError(error.to_string())]
    }

    /// Record how the connection ended. Only the first closure counts.
    pub fn closed(&mut self, closure: Closure) -> Vec<StreamEvent> {
        if self.cancelled || self.closure.is_some() {
            return Vec::new();
        }
        match &closure {
            Closure::Clean { code, reason } => {
                info!(code, %reason, "websocket closed cleanly")
            }
            Closure::Unexpected => warn!(
                complete = self.complete,
                "websocket disconnected unexpectedly"
            ),
            Closure::Cancelled => info!("websocket closed by teardown"),
            Closure::Aborted { reason } => warn!(%reason, "closing websocket"),
            Closure::ConnectFailed { error } => error!(%error, "websocket connection failed"),
        }
        self.finish(closure.clone());
        vec![StreamEvent::Closed(closure)]
    }

    /// Teardown. Idempotent; returns whether this call did the cancelling.
    ///
    /// After this, every transport event is ignored and the log is frozen.
    pub fn cancel(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        if self.closure.is_none() {
            self.finish(Closure::Cancelled);
        }
        self.cancelled = true;
        debug!(fragments = self.log.len(), "session cancelled");
        true
    }

    fn accepts_data(&self) -> bool {
        !self.cancelled
            && self.closure.is_none()
            && matches!(
                self.state,
                SessionState::Open | SessionState::Streaming | SessionState::Completed
            )
    }

    fn malformed(&mut self, e: &FrameError) -> StreamEvent {
        self.malformed_frames += 1;
        warn!(error = %e, "discarding malformed frame");
        StreamEvent::MalformedFrame(e.to_string())
    }

    fn abort(&mut self, reason: String) -> Vec<StreamEvent> {
        self.closed(Closure::Aborted { reason })
    }

    fn finish(&mut self, closure: Closure) {
        if self.state != SessionState::Completed {
            self.state = if closure.is_clean() {
                SessionState::Closed
            } else {
                SessionState::Errored
            };
        }
        self.processing = false;
        self.closure = Some(closure);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Waiting on the server: true from connect until end or closure.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// The end signal was received.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn has_pending_frame(&self) -> bool {
        self.reassembler.is_pending()
    }

    pub fn log(&self) -> &ResponseLog {
        &self.log
    }

    pub fn current_text(&self) -> String {
        self.log.current_text()
    }

    pub fn closure(&self) -> Option<&Closure> {
        self.closure.as_ref()
    }

    pub fn malformed_frames(&self) -> usize {
        self.malformed_frames
    }

    pub fn transport_errors(&self) -> usize {
        self.transport_errors
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            text: self.current_text(),
            processing: self.processing,
            complete: self.complete,
            state: self.state,
            closure: self.closure.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_session() -> StreamSession {
        let mut session = StreamSession::default();
        session.begin_connect();
        assert_eq!(session.opened(), vec![StreamEvent::Opened]);
        session
    }

    fn delta(text: &str) -> String {
        serde_json::json!({"type": "delta", "text": text}).to_string()
    }

    const END: &str = r#"{"type":"end"}"#;

    #[test]
    fn lifecycle_reaches_completed() {
        let mut session = StreamSession::default();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_processing());

        session.begin_connect();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.is_processing());

        session.opened();
        assert_eq!(session.state(), SessionState::Open);

        session.receive(&delta("a"));
        assert_eq!(session.state(), SessionState::Streaming);

        assert_eq!(session.receive(END), vec![StreamEvent::End]);
        assert_eq!(session.state(), SessionState::Completed);
        assert!(!session.is_processing());
    }

    #[test]
    fn deltas_then_end_build_the_answer() {
        let mut session = open_session();
        for (i, part) in ["Hel", "lo ", "world"].into_iter().enumerate() {
            let events = session.receive(&delta(part));
            assert_eq!(events, vec![StreamEvent::Delta(part.into())]);
            assert!(!session.is_complete(), "complete too early at delta {i}");
        }
        assert_eq!(session.current_text(), "Hello world");

        session.receive(END);
        assert!(session.is_complete());
        assert_eq!(session.current_text(), "Hello world");
    }

    #[test]
    fn text_is_observable_mid_stream_in_order() {
        let mut session = open_session();
        let parts = ["one ", "two ", "three"];
        let mut expected = String::new();
        for part in parts {
            session.receive(&delta(part));
            expected.push_str(part);
            assert_eq!(session.snapshot().text, expected);
        }
    }

    #[test]
    fn fragmented_delivery_appends_once() {
        let mut session = open_session();
        assert!(session.receive(r#"{"type":"del"#).is_empty());
        assert!(session.has_pending_frame());
        assert_eq!(
            session.receive(r#"ta","text":"hi"}"#),
            vec![StreamEvent::Delta("hi".into())]
        );
        assert_eq!(session.log().fragments(), ["hi"]);
    }

    #[test]
    fn bundled_delivery_dispatches_every_message() {
        let mut session = open_session();
        let bundle = format!("{}{}{}", delta("a"), delta("b"), END);
        assert_eq!(
            session.receive(&bundle),
            vec![
                StreamEvent::Delta("a".into()),
                StreamEvent::Delta("b".into()),
                StreamEvent::End
            ]
        );
        assert_eq!(session.current_text(), "ab");
    }

    #[test]
    fn malformed_delivery_keeps_log_and_connection() {
        let mut session = open_session();
        session.receive(&delta("kept"));

        let events = session.receive("not json at all");
        assert!(matches!(events.as_slice(), [StreamEvent::MalformedFrame(_)]));
        assert_eq!(session.malformed_frames(), 1);
        assert_eq!(session.current_text(), "kept");
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(!session.has_pending_frame());

        session.receive(&delta("!"));
        assert_eq!(session.current_text(), "kept!");
    }

    #[test]
    fn invalid_message_does_not_hide_the_next_one() {
        let mut session = open_session();
        let events = session.receive(&format!(r#"{{"text":"no kind"}}{}"#, delta("x")));
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::MalformedFrame(_), StreamEvent::Delta(t)] if t == "x"
        ));
    }

    #[test]
    fn unknown_kinds_produce_no_events() {
        let mut session = open_session();
        assert!(session.receive(r#"{"type":"heartbeat"}"#).is_empty());
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn end_is_signalled_once_and_later_deltas_still_apply() {
        let mut session = open_session();
        session.receive(END);
        assert!(session.receive(END).is_empty());
        session.receive(&delta("late"));
        assert!(session.is_complete());
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.current_text(), "late");
    }

    #[test]
    fn teardown_mid_stream_freezes_the_log() {
        let mut session = open_session();
        session.receive(&delta("Hel"));
        session.receive(&delta("lo "));

        assert!(session.cancel());
        assert!(session.receive(&delta("world")).is_empty());
        assert!(session.receive(END).is_empty());
        assert!(session.closed(Closure::Unexpected).is_empty());

        assert_eq!(session.log().fragments(), ["Hel", "lo "]);
        assert!(!session.is_complete());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.closure(), Some(&Closure::Cancelled));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut session = StreamSession::default();
        assert!(session.cancel());
        assert!(!session.cancel());
        session.begin_connect();
        assert!(session.opened().is_empty());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn unexpected_closure_before_end_is_errored_and_clears_processing() {
        let mut session = open_session();
        session.receive(&delta("partial"));
        assert_eq!(
            session.closed(Closure::Unexpected),
            vec![StreamEvent::Closed(Closure::Unexpected)]
        );
        assert_eq!(session.state(), SessionState::Errored);
        assert!(!session.is_processing());
        assert_eq!(session.current_text(), "partial");
    }

    #[test]
    fn clean_closure_after_end_keeps_completed() {
        let mut session = open_session();
        session.receive(END);
        session.closed(Closure::Clean {
            code: 1000,
            reason: String::new(),
        });
        assert_eq!(session.state(), SessionState::Completed);
        assert!(session.closure().is_some_and(Closure::is_clean));
    }

    #[test]
    fn only_the_first_closure_is_recorded() {
        let mut session = open_session();
        session.closed(Closure::Clean {
            code: 1001,
            reason: "going away".into(),
        });
        assert!(session.closed(Closure::Unexpected).is_empty());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.receive(&delta("x")).is_empty());
    }

    #[test]
    fn transport_error_does_not_close() {
        let mut session = open_session();
        let events = session.transport_error("connection reset");
        assert_eq!(events, vec![StreamEvent::TransportError("connection reset".into())]);
        assert_eq!(session.transport_errors(), 1);
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.closure().is_none());
    }

    #[test]
    fn oversized_frame_forces_closure() {
        let mut session = StreamSession::new(8);
        session.begin_connect();
        session.opened();
        let events = session.receive(r#"{"type":"delta","text":"#);
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::MalformedFrame(_), StreamEvent::Closed(Closure::Aborted { .. })]
        ));
        assert_eq!(session.state(), SessionState::Errored);
        assert!(session.receive(r#""x"}"#).is_empty());
    }

    #[test]
    fn timeout_with_pending_frame_abandons_it() {
        let mut session = open_session();
        session.receive(r#"{"type":"delta""#);
        let events = session.timed_out();
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::MalformedFrame(_), StreamEvent::Closed(Closure::Aborted { .. })]
        ));
        assert_eq!(session.malformed_frames(), 1);
        assert_eq!(session.state(), SessionState::Errored);
    }

    #[test]
    fn idle_timeout_after_end_keeps_completed() {
        let mut session = open_session();
        session.receive(END);
        let events = session.timed_out();
        assert_eq!(
            events,
            vec![StreamEvent::Closed(Closure::Aborted {
                reason: "idle timeout".into()
            })]
        );
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[test]
    fn connect_failure_is_errored() {
        let mut session = StreamSession::default();
        session.begin_connect();
        session.closed(Closure::ConnectFailed {
            error: "refused".into(),
        });
        assert_eq!(session.state(), SessionState::Errored);
        assert!(!session.is_processing());
    }
}
