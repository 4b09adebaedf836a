use std::{str::FromStr, time};

use envconfig::Envconfig;

use crate::{backoff::BackoffPolicy, error::RunError, pipeline::LoadOptions};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "CITATION_PATH", default = "./citations")]
    pub citation_path: String,

    #[envconfig(from = "DATA_PATH", default = "./data")]
    pub data_path: String,

    #[envconfig(from = "CITATION_SUFFIX", default = ".json")]
    pub citation_suffix: String,

    #[envconfig(from = "DATA_SUFFIX", default = ".jsonl")]
    pub data_suffix: String,

    #[envconfig(from = "BATCH_SIZE", default = "1000")]
    pub batch_size: usize,

    #[envconfig(from = "EXPECTED_DIM", default = "1536")]
    pub expected_dim: usize,

    // 64KiB
    #[envconfig(from = "READ_CHUNK_SIZE", default = "65536")]
    pub read_chunk_size: usize,

    #[envconfig(from = "OBJECT_CONCURRENCY", default = "1")]
    pub object_concurrency: usize,

    #[envconfig(from = "INDEX_UNMATCHED", default = "false")]
    pub index_unmatched: bool,

    #[envconfig(from = "SINK", default = "search")]
    pub sink: SinkKind,

    #[envconfig(from = "SEARCH_ENDPOINT", default = "http://localhost:8080")]
    pub search_endpoint: NonEmptyString,

    #[envconfig(from = "SEARCH_INDEX_NAME", default = "embeddings")]
    pub search_index_name: NonEmptyString,

    #[envconfig(from = "SEARCH_API_KEY")]
    pub search_api_key: Option<NonEmptyString>,

    #[envconfig(from = "SEARCH_API_VERSION", default = "2023-11-01")]
    pub search_api_version: NonEmptyString,

    #[envconfig(from = "SEARCH_CREATE_INDEX", default = "false")]
    pub search_create_index: bool,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "30000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "OUTPUT_PATH", default = "combined.jsonl")]
    pub output_path: String,

    // 1 means no retries
    #[envconfig(from = "UPLOAD_MAX_ATTEMPTS", default = "3")]
    pub upload_max_attempts: u32,

    #[envconfig(from = "BACKOFF_INITIAL_MS", default = "1000")]
    pub backoff_initial: EnvMsDuration,

    #[envconfig(from = "BACKOFF_MULTIPLIER", default = "2.0")]
    pub backoff_multiplier: f64,

    #[envconfig(from = "BACKOFF_MAX_MS", default = "30000")]
    pub backoff_max: EnvMsDuration,

    #[envconfig(from = "MAX_CONSECUTIVE_FAILED_BATCHES", default = "5")]
    pub max_consecutive_failed_batches: usize,
}

impl Config {
    /// Rejects values that parse fine but can't drive a run.
    pub fn validate(&self) -> Result<(), RunError> {
        let positive = [
            ("BATCH_SIZE", self.batch_size),
            ("EXPECTED_DIM", self.expected_dim),
            ("READ_CHUNK_SIZE", self.read_chunk_size),
            ("OBJECT_CONCURRENCY", self.object_concurrency),
            (
                "MAX_CONSECUTIVE_FAILED_BATCHES",
                self.max_consecutive_failed_batches,
            ),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(RunError::InvalidConfig(format!("{name} must be greater than 0")));
            }
        }
        if self.upload_max_attempts == 0 {
            return Err(RunError::InvalidConfig(
                "UPLOAD_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RunError::InvalidConfig(
                "BACKOFF_MULTIPLIER must be a finite number of at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            batch_size: self.batch_size,
            expected_dim: self.expected_dim,
            citation_suffix: self.citation_suffix.clone(),
            data_suffix: self.data_suffix.clone(),
            index_unmatched: self.index_unmatched,
            object_concurrency: self.object_concurrency,
            max_consecutive_failed_batches: self.max_consecutive_failed_batches,
            ..Default::default()
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.backoff_initial.0,
            self.backoff_multiplier,
            self.backoff_max.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Search,
    File,
    NoOp,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseSinkKindError;

impl FromStr for SinkKind {
    type Err = ParseSinkKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "search" => Ok(SinkKind::Search),
            "file" => Ok(SinkKind::File),
            "noop" => Ok(SinkKind::NoOp),
            _ => Err(ParseSinkKindError),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
