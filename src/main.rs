use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use newsletter_quiz::config::PipelineConfig;
use newsletter_quiz::pipeline::QuizPipeline;

const LOG_FILE_PREFIX: &str = "newsletter-quiz.log";

/// Stderr logging, plus a daily rolling file when a log directory is configured.
///
/// The returned guard flushes the file writer on drop; hold it until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = PipelineConfig::from_env();
    let _log_guard = init_tracing(
        config
            .as_ref()
            .ok()
            .and_then(|c| c.log_dir.as_deref()),
    );
    let config = config.context("Invalid configuration")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mailbox = %config.mailbox.mailbox,
        models = %config.llm.models.join(","),
        output_dir = %config.storage.output_dir.display(),
        "Starting newsletter quiz run"
    );

    let pipeline = QuizPipeline::from_config(&config).context("Failed to set up pipeline")?;
    let summary = pipeline.run_once().await.context("Run aborted")?;

    println!("{summary}");
    Ok(())
}
