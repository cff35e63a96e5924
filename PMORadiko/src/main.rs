use anyhow::{Context, Result};
use pmoconfig::get_config;
use pmoradiko::{
    CapturePipeline, ConcatMerger, Converter, Radiko, RadikoClient, RadikoConfigExt,
    RadikoRecorder,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = get_config();

    // RUST_LOG wins over the configured level
    let level = config.get_log_min_level()?.to_lowercase();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(config_dir = %config.directory(), "📻 Starting PMORadiko");

    let station = config.get_radiko_station()?;
    let bitrate = config.get_radiko_bitrate()?;
    let buffer_secs = config.get_radiko_buffer_secs()?;
    let output_dir = config.get_radiko_output_dir()?;
    let temp_dir = config.get_radiko_temp_dir()?;
    let policy = config.get_radiko_retry_policy()?;
    let timeout_secs = config.get_radiko_timeout_secs()?;

    let converter = match config.get_radiko_converter()? {
        Some(path) => Converter::from_path(path)?,
        None => Converter::lookup()?,
    };
    info!(converter = %converter.path().display(), "Using decoder");

    let client = RadikoClient::builder().temp_dir(&temp_dir).build().await?;
    let pipeline =
        CapturePipeline::new(converter.clone()).with_drain_timeout(policy.capture_drain_timeout());
    let recorder = RadikoRecorder::new(client, pipeline, station.as_str())
        .with_bitrate(bitrate)
        .with_buffer_secs(buffer_secs);
    let merger = ConcatMerger::new(converter, &temp_dir);

    let mut radiko =
        Radiko::new(Arc::new(recorder), Arc::new(merger), &temp_dir).with_policy(policy);

    let cancel = CancellationToken::new();
    spawn_shutdown_watch(cancel.clone(), timeout_secs);

    info!(%station, "🎙️ Recording");
    let recording = radiko
        .run(&cancel)
        .await
        .with_context(|| format!("recording {} ended {}", station, radiko.state()))?;

    let saved = recording
        .save(Path::new(&output_dir))
        .await
        .context("saving the recording")?;

    info!(
        audio = %saved.audio_path.display(),
        metadata = %saved.metadata_path.display(),
        title = %saved.program.title,
        "✅ Program saved"
    );
    Ok(())
}

/// Cancel `cancel` on Ctrl-C, or once `timeout_secs` have elapsed (0 = never)
fn spawn_shutdown_watch(cancel: CancellationToken, timeout_secs: u64) {
    tokio::spawn(async move {
        let deadline = async {
            if timeout_secs == 0 {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Ctrl-C received, stopping"),
            _ = deadline => warn!(timeout_secs, "Run timeout reached, stopping"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
}
