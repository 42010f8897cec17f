//! CLI commands implementation

pub mod ingest;
pub mod init;
pub mod listings;
pub mod signals;
pub mod sources;
pub mod status;

pub use ingest::*;
pub use init::*;
pub use listings::*;
pub use signals::*;
pub use sources::*;
pub use status::*;
