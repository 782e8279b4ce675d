//! IP camera: capture, watermark and publish

use std::io;

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipcam::publish::{FrameSink, Publisher, WriterSink};
use ipcam::{CaptureFilterPipeline, Config, SinkKind};

fn build_sink(config: &Config) -> Result<Box<dyn FrameSink>> {
    match config.publish.sink {
        SinkKind::Stdout => Ok(Box::new(WriterSink::new(io::stdout()))),
        #[cfg(feature = "gstreamer-pipeline")]
        SinkKind::Gstreamer => {
            let capture = &config.capture;
            let sink = ipcam::publish::gst_sink::GstSink::new(
                &config.publish.launch,
                capture.width,
                capture.height,
                capture.fps,
            )?;
            Ok(Box::new(sink))
        }
        #[cfg(not(feature = "gstreamer-pipeline"))]
        SinkKind::Gstreamer => Err(eyre!("Built without the gstreamer-pipeline feature")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ipcam=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(io::stderr)
        .init();

    info!("ipcam launching...");

    let config = Config::load()?;
    info!(
        "Capturing from {} {:?}, publishing to {:?}",
        config.capture.driver, config.capture.device, config.publish.sink
    );

    let sink = build_sink(&config)?;
    let pipeline = CaptureFilterPipeline::with_overlay(config.overlay.clone());
    let publisher = Publisher::new(pipeline, config.capture.clone(), sink)?;

    let (stop_tx, stop_rx) = flume::bounded::<()>(1);
    let handle = publisher.spawn(stop_rx)?;

    let signals = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping publisher");
            let _ = stop_tx.send(());
        }
    });
    let joined = tokio::task::spawn_blocking(move || handle.join()).await?;
    signals.abort();

    match joined {
        Ok(result) => result.map(|_| ())?,
        Err(_) => return Err(eyre!("Publisher thread panicked")),
    }

    info!("ipcam shutting down");
    Ok(())
}
