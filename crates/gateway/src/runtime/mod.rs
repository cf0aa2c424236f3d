//! Core runtime: session actors, the turn loop, capabilities, document
//! ingestion, and the research pipeline executed by the task engine.

pub mod capabilities;
pub mod directory;
pub mod ingest;
pub mod research;
pub mod session;
pub mod turn;

pub use capabilities::{CallContext, Capability, CapabilityRegistry, CapabilityResult};
pub use directory::SessionDirectory;
pub use ingest::{IngestReport, Ingestor};
pub use session::{SessionActor, SessionHandle};
pub use turn::{run_turn, TurnDeps, TurnOutcome};
