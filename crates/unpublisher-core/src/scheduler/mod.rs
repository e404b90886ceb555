//! Recurring firing of policies: tick → select → dispatch

mod dispatcher;
mod pipeline;
pub mod recurrence;
mod selector;
mod service;
mod single_flight;

pub use dispatcher::{BatchDispatcher, DEFAULT_CHUNK_SIZE};
pub use pipeline::{FiringOutcome, Pipeline};
pub use recurrence::{fire, tick, Tick};
pub use selector::{CandidateSelector, DEFAULT_PAGE_SIZE};
pub use service::{SchedulerEvent, SchedulerService};
pub use single_flight::{FlightGuard, SingleFlight};
