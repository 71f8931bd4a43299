//! Routes reassembled server messages to their effect.

use tracing::{debug, info};

use crate::messages::ServerMessage;
use crate::response::ResponseLog;

/// What dispatching a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A fragment was appended to the log.
    Appended(String),
    /// The first end signal arrived.
    Completed,
    /// Nothing changed.
    Ignored,
}

/// Apply `message` to the log and the completion flag.
///
/// `end` only flips `complete` from false to true; later messages are still
/// dispatched but never reset it.
pub fn dispatch(message: ServerMessage, log: &mut ResponseLog, complete: &mut bool) -> Effect {
    match message {
        ServerMessage::Delta(text) => {
            log.push(text.clone());
            Effect::Appended(text)
        }
        ServerMessage::End if !*complete => {
            *complete = true;
            info!(fragments = log.len(), "end of response");
            Effect::Completed
        }
        ServerMessage::End => {
            debug!("repeated end signal ignored");
            Effect::Ignored
        }
        ServerMessage::Unknown(kind) => {
            debug!(%kind, "ignoring message of unknown kind");
            Effect::Ignored
        }
    }
}
