//! Phased capital allocation across both outcomes of a trading window.

pub mod position;
pub mod state_machine;

pub use position::{CapitalPosition, ExecutionKind, Phase, Pool, Session, Trade};
pub use state_machine::{
    ArbitrageStateMachine, PositionSnapshot, ResolutionStatus, ResolutionSummary,
};
