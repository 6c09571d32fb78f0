//! Store initialization, schema sync and migrations

pub mod init;
pub mod migrations;
pub mod schema_sync;

pub use init::*;
pub use migrations::*;
pub use schema_sync::*;
