//! Streaming chat client: WebSocket transport, frame reassembly, response
//! accumulation and language resolution for the `sendMessage` protocol.
//! Used by the `cic-chat` binary.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod language;
pub mod messages;
pub mod reassembler;
pub mod render;
pub mod response;
pub mod session;

pub use client::{open, ClientError, Connection, StreamOptions};
pub use config::{default_config_path, Config, ConfigError};
pub use language::{resolve, LanguageDetector, LanguageTag, WhatlangDetector};
pub use messages::{ChatRequest, ServerMessage};
pub use reassembler::{Feed, FrameError, FrameReassembler};
pub use render::{RenderMode, TextRenderer};
pub use response::ResponseLog;
pub use session::{Closure, SessionState, Snapshot, StreamEvent, StreamSession};
