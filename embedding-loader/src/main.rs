use std::sync::Arc;

use anyhow::{Context, Error};
use embedding_loader::{
    config::{Config, SinkKind},
    error::RunError,
    pipeline::load,
    sink::{file::FileSink, search::SearchIndexSink, NoOpSink, UploadSink},
    source::folder::FolderSource,
    upload::Uploader,
};
use envconfig::Envconfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn build_sink(config: &Config) -> Result<Arc<dyn UploadSink>, Error> {
    match config.sink {
        SinkKind::Search => {
            let sink = SearchIndexSink::new(
                config.search_endpoint.as_str().to_string(),
                config.search_index_name.as_str().to_string(),
                config.search_api_key.as_ref().map(|k| k.as_str().to_string()),
                config.search_api_version.as_str().to_string(),
                config.request_timeout.0,
            )
            .context("Failed to create search index sink")?;
            if config.search_create_index {
                sink.ensure_index(config.expected_dim)
                    .await
                    .context("Failed to create search index")?;
            }
            Ok(Arc::new(sink))
        }
        SinkKind::File => {
            let sink = FileSink::new(config.output_path.clone(), true)
                .await
                .context("Failed to create file sink")?;
            Ok(Arc::new(sink))
        }
        SinkKind::NoOp => Ok(Arc::new(NoOpSink)),
    }
}

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().context("Failed to read configuration")?;
    config.validate()?;

    let citations = FolderSource::new(&config.citation_path, config.read_chunk_size)
        .await
        .map_err(RunError::CitationSourceUnavailable)?;
    let data = FolderSource::new(&config.data_path, config.read_chunk_size)
        .await
        .map_err(RunError::DataSourceUnavailable)?;

    let sink = build_sink(&config).await?;
    let uploader = Uploader::new(sink, config.backoff_policy(), config.upload_max_attempts);

    let options = config.load_options();
    let shutdown = options.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, finishing in-flight work");
            shutdown.cancel();
        }
    });

    info!(
        citations = %config.citation_path,
        data = %config.data_path,
        sink = ?config.sink,
        "Loading embeddings"
    );
    let summary = load(&citations, &data, &uploader, &options).await?;
    info!(
        records_indexed = summary.records_indexed,
        batches_failed = summary.batches_failed,
        "Done"
    );
    Ok(())
}
