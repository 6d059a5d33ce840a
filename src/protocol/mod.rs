//! Multi-stage protocols.
//!
//! - [`stage`]: stages and their expansion into a [`ProtocolQueue`]
//! - [`state`]: the runner lifecycle
//! - [`runner`]: the state machine applying set-points to a device
//! - [`handle`]: the task that drives a runner on its tick timer
//! - [`table`]: CSV protocol tables
//! - [`presets`]: built-in protocols

pub mod handle;
pub mod presets;
pub mod runner;
pub mod stage;
pub mod state;
pub mod table;

pub use handle::RunnerHandle;
pub use presets::{three_stage_growth, GrowthParams};
pub use runner::{ProtocolRunner, RunOptions, RunnerEvent, RunnerSnapshot, StatusReport};
pub use stage::{expand, ProtocolQueue, SetPoint, Stage};
pub use state::RunnerState;
pub use table::{load_protocol, save_protocol, ProtocolRow};
