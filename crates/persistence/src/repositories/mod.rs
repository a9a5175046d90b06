//! Repository implementations for database operations.

pub mod export_queue;
pub mod export_record;
pub mod property;

pub use export_queue::PgJobQueue;
pub use export_record::ExportRecordRepository;
pub use property::PropertyRepository;
