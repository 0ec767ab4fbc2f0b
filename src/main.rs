use deprecation_collector::config::SinkConfig;
use deprecation_collector::ops::telemetry;
use deprecation_collector::sink::{start_sink_server, AllowList, DeprecationSink, SubmissionRateLimiter};
use std::sync::Arc;

// * `pretty` switches to human-readable logs for local development; JSON otherwise
const LOG_FORMAT_VAR: &str = "DEPRECATION_COLLECTOR_LOG_FORMAT";

#[tokio::main]
async fn main() {
    match std::env::var(LOG_FORMAT_VAR).as_deref() {
        Ok("pretty") => telemetry::init_tracing_pretty(),
        _ => telemetry::init_tracing(),
    }

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Deprecation collector sink failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = SinkConfig::from_env()?;
    let allow_list = AllowList::load(&config.allow_list_path)?;
    let limiter = SubmissionRateLimiter::new(config.redis_url.as_deref()).await?;
    let sink = Arc::new(DeprecationSink::new(
        allow_list,
        config.overflow_policy,
        config.db_label.clone(),
        limiter,
    ));

    let handle = start_sink_server(sink, &config).await?;
    tracing::info!(addr = %handle.local_addr(), "Deprecation collector sink ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    handle.shutdown();
    Ok(())
}
