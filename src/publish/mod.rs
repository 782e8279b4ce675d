//! Fixed-cadence delivery of watermarked frames
//!
//! A [`Publisher`] owns one pipeline and pulls from it once per frame period
//! on a dedicated thread. Every tick produces exactly one outbound buffer: the
//! new frame when the pipeline delivered one, otherwise the previous buffer
//! again, so downstream never sees a gap.

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_sink;

use std::io::Write;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::capture::colorspace::fill_black;
use crate::capture::frame::PixelFormat;
use crate::pipeline::CaptureFilterPipeline;
use crate::CaptureConfig;

/// Encoder and transport behind the GStreamer sink's appsrc
pub const DEFAULT_LAUNCH: &str =
    "videoconvert ! x264enc tune=zerolatency speed-preset=ultrafast ! rtph264pay pt=96 ! udpsink host=127.0.0.1 port=5000";

/// One outbound packed frame with its stream timing
#[derive(Debug, Clone)]
pub struct OutboundBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Running time since the first pushed buffer
    pub pts: Duration,
    pub duration: Duration,
    /// Whether `data` was refreshed by the last capture
    pub fresh: bool,
}

/// Destination for outbound buffers
pub trait FrameSink: Send {
    fn push(&mut self, buffer: &OutboundBuffer) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn push(&mut self, buffer: &OutboundBuffer) -> Result<()> {
        (**self).push(buffer)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Writes raw packed frames back to back, e.g. to stdout for an external server
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> FrameSink for WriterSink<W> {
    fn push(&mut self, buffer: &OutboundBuffer) -> Result<()> {
        self.writer.write_all(&buffer.data)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

pub struct Publisher<S> {
    pipeline: CaptureFilterPipeline,
    sink: S,
    config: CaptureConfig,
    buffer: OutboundBuffer,
    period: Duration,
    pushed: u64,
}

impl<S: FrameSink> Publisher<S> {
    pub fn new(pipeline: CaptureFilterPipeline, config: CaptureConfig, sink: S) -> Result<Self> {
        if config.fps == 0 {
            return Err(eyre!("Frame rate must be positive"));
        }
        let size = PixelFormat::Yuyv422
            .frame_size(config.width, config.height)
            .ok_or_else(|| eyre!("{}x{} frame size overflows", config.width, config.height))?;

        let mut data = vec![0; size];
        fill_black(&mut data);
        let period = Duration::from_secs(1) / config.fps;

        Ok(Self {
            pipeline,
            sink,
            buffer: OutboundBuffer {
                data,
                width: config.width,
                height: config.height,
                pts: Duration::ZERO,
                duration: period,
                fresh: false,
            },
            config,
            period,
            pushed: 0,
        })
    }

    pub fn pipeline(&self) -> &CaptureFilterPipeline {
        &self.pipeline
    }

    /// Open the pipeline. A failure is logged and the publisher keeps
    /// delivering its blank buffer.
    pub fn open(&mut self) -> bool {
        match self.pipeline.open(&self.config) {
            Ok(()) => true,
            Err(e) => {
                error!("Camera unavailable, publishing a blank stream: {}", e);
                false
            }
        }
    }

    /// Capture once and push one buffer
    pub fn tick(&mut self) -> Result<()> {
        self.buffer.fresh = false;
        if let Some(frame) = self.pipeline.capture() {
            if frame.data.len() == self.buffer.data.len() {
                self.buffer.data.copy_from_slice(&frame.data);
                self.buffer.fresh = true;
            } else {
                warn!(
                    "Dropping {}x{} frame, stream is {}x{}",
                    frame.width(),
                    frame.height(),
                    self.buffer.width,
                    self.buffer.height
                );
            }
        }

        self.sink.push(&self.buffer)?;
        self.buffer.pts += self.period;
        self.pushed += 1;
        metrics::counter!("ipcam_frames_published_total").increment(1);
        Ok(())
    }

    /// Tick every frame period until `stop` fires or is dropped
    pub fn run(mut self, stop: Receiver<()>) -> Result<Self> {
        self.open();
        info!("Publishing at {} fps", self.config.fps);

        let mut next = Instant::now();
        let result = loop {
            if let Err(e) = self.tick() {
                break Err(e);
            }

            let now = Instant::now();
            next = next_deadline(next, self.period, now);
            match stop.recv_timeout(next.saturating_duration_since(now)) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break Ok(()),
            }
        };

        info!("Publisher stopping after {} buffers", self.pushed);
        self.pipeline.close();
        if let Err(e) = self.sink.close() {
            warn!("Failed to close sink: {}", e);
        }
        debug!("Publisher stopped");
        result.map(|()| self)
    }

    pub fn spawn(self, stop: Receiver<()>) -> Result<JoinHandle<Result<Self>>>
    where
        S: 'static,
    {
        let handle = thread::Builder::new()
            .name("publisher".into())
            .spawn(move || self.run(stop))?;
        Ok(handle)
    }
}

/// Deadline of the tick after the one due at `next`. When more than a period
/// behind, the schedule restarts from `now` instead of bursting to catch up.
fn next_deadline(next: Instant, period: Duration, now: Instant) -> Instant {
    let next = next + period;
    if now.saturating_duration_since(next) > period {
        debug!(
            "Publisher fell {:?} behind, resynchronizing",
            now.saturating_duration_since(next)
        );
        return now;
    }
    next
}
