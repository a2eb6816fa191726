pub mod orchestrator;
pub mod reconnect;

pub use orchestrator::{RecordSink, SessionKey, StreamOrchestrator, DEFAULT_STREAM_POOL_SIZE};
pub use reconnect::{run_with_reconnect, ReconnectPolicy};
