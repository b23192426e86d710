pub mod active_conductor;
pub mod change;
pub mod conductor;
pub mod message;
pub mod position;

pub use active_conductor::{ActiveConductor, ActiveConductorView, ConductorStatus, Freshness};
pub use change::{ChangeEvent, ChangeOp};
pub use conductor::Conductor;
pub use message::FixMessage;
pub use position::PositionSample;

pub type ConductorId = uuid::Uuid;
