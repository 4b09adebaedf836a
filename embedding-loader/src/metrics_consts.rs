pub const CITATION_RECORDS_LOADED: &str = "embedding_loader_citation_records_loaded";
pub const CITATION_OBJECTS_CORRUPTED: &str = "embedding_loader_citation_objects_corrupted";
pub const DATA_OBJECTS_PROCESSED: &str = "embedding_loader_data_objects_processed";
pub const DATA_OBJECTS_CORRUPTED: &str = "embedding_loader_data_objects_corrupted";
pub const RECORDS_CONSIDERED: &str = "embedding_loader_records_considered";
pub const RECORDS_SKIPPED: &str = "embedding_loader_records_skipped";
pub const RECORDS_INDEXED: &str = "embedding_loader_records_indexed";
pub const RECORDS_FAILED: &str = "embedding_loader_records_failed";
pub const BATCHES_UPLOADED: &str = "embedding_loader_batches_uploaded";
pub const BATCHES_FAILED: &str = "embedding_loader_batches_failed";
pub const UPLOAD_RETRIES: &str = "embedding_loader_upload_retries";
pub const UPLOAD_DURATION: &str = "embedding_loader_upload_duration_seconds";
