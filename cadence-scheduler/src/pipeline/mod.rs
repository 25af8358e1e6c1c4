//! Pipeline jobs
//!
//! `Pending → Downloading → Downloaded → Embedding → Embedded → Training →
//! Trained → Succeeded`, with `Failed` reachable from every non-terminal
//! state. The watcher fires one transition per job and tick.

pub mod fsm;
pub mod stages;
pub mod watcher;

pub use fsm::{PipelineMachine, Transition, can_transition, successor};
pub use stages::StageOutcome;
pub use watcher::{PIPELINE_WATCHER, PipelineWatcher};
