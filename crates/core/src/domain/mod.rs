pub mod change_log;
pub mod entry;
pub mod snapshot;
pub mod update;
