pub mod common;
pub mod completions;
pub mod conflicts;
pub mod mutate;
pub mod queue;
pub mod status;
pub mod sync;
pub mod watch;
