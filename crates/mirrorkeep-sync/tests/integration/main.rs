//! Integration tests for mirrorkeep-sync
//!
//! Exercise the replication engine, live watchers, retry queue and drive
//! tracking together against real temporary directory trees.

mod common;

mod test_drive_activation;
mod test_live_watch;
mod test_replication;
mod test_retry;
