mod models;

pub use models::{JobRun, LogEntry, RunStatus, NO_LOGS};
