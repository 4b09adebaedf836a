pub mod backoff;
pub mod batch;
pub mod citation;
pub mod config;
pub mod decode;
pub mod error;
pub mod metrics_consts;
pub mod pipeline;
pub mod record;
pub mod sink;
pub mod source;
pub mod upload;
