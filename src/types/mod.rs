pub mod options;
pub mod process;
pub mod query;

pub use options::{Access, CreateOptions, Priority, ShowMode};
pub use process::{ProcessInfo, ProcessSnapshotEntry};
pub use query::{names_match, Pid, ProcessQuery};
