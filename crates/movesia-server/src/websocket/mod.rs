//! WebSocket layer: connection state, session registry, liveness sweeps,
//! frame routing, and the editor bridge that ties them together.

pub mod bridge;
pub mod connection;
pub mod correlator;
pub mod heartbeat;
pub mod registry;
pub mod router;
mod session;

pub use bridge::EditorBridge;
pub use connection::{EditorConnection, Outbound};
pub use correlator::CommandCorrelator;
pub use heartbeat::HeartbeatEngine;
pub use registry::{Admission, SessionEntry, SessionRegistry};
pub use router::MessageRouter;
