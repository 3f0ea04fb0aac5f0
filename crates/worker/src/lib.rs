pub mod order_import;
pub mod order_ingestion;

pub use order_import::{OrderImportPublisher, OrderImportService};
pub use order_ingestion::{FlushReport, OrderIngestionWorker};
