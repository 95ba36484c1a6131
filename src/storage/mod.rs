//! Persistence: connection pool, embedded migrations, record model, and the
//! metadata repository.

mod migrations;
mod pool;
mod record;
mod repository;

pub use migrations::run_migrations;
pub use pool::init_db_pool_with_path;
pub use record::{FetchedMetadata, MetadataRecord, RecordStatus, TruncationDetails};
pub use repository::{MetadataRepository, SqliteMetadataRepository};
