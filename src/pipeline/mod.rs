//! Capture -> decode -> watermark pipeline
//!
//! [`CaptureFilterPipeline`] owns one input device, its decoder, the overlay
//! filter graph and the scratch buffers they share. All of them are acquired
//! by [`open`](CaptureFilterPipeline::open) and held together in a session
//! that is either complete or absent.

pub mod error;
pub mod resources;

use std::sync::Arc;

use color_eyre::Report;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::decoder::{find_decoder, DecodeError, Decoder};
use crate::capture::frame::{Frame, FrameBuffer, Packet, PixelFormat, Rational};
use crate::capture::{registry, InputDevice};
use crate::filter::watermark;
use crate::filter::{FilterError, FilterGraph, SinkParams, SourceParams};
use crate::{CaptureConfig, OverlayConfig};
pub use error::{PipelineError, Result};
pub use resources::{ResourceKind, ResourceTracker, Tracked};

use error::reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Closed,
    Ready,
}

/// Everything an open pipeline holds.
///
/// Fields drop top to bottom, which is the teardown order of `close`.
struct Session {
    graph: Tracked<FilterGraph>,
    decoder: Tracked<Box<dyn Decoder>>,
    input: Tracked<Box<dyn InputDevice>>,
    packet: Tracked<Packet>,
    raw: Tracked<FrameBuffer>,
    watermarked: Tracked<FrameBuffer>,
    stream_index: usize,
    device: String,
}

/// Why a capture produced no frame
#[derive(Debug)]
enum CaptureMiss {
    Read(Report),
    OtherStream(usize),
    Send(DecodeError),
    Receive(DecodeError),
    Push(FilterError),
    Pull(FilterError),
    Pending,
}

impl CaptureMiss {
    fn stage(&self) -> &'static str {
        match self {
            CaptureMiss::Read(_) | CaptureMiss::OtherStream(_) => "read",
            CaptureMiss::Send(_) => "decode_send",
            CaptureMiss::Receive(_) => "decode_receive",
            CaptureMiss::Push(_) => "filter_push",
            CaptureMiss::Pull(_) | CaptureMiss::Pending => "filter_pull",
        }
    }

    fn log(&self) {
        match self {
            CaptureMiss::Read(e) => debug!("No packet: {:#}", e),
            CaptureMiss::OtherStream(index) => debug!("Skipping packet of stream {}", index),
            CaptureMiss::Send(e) => debug!("Decoder refused packet: {}", e),
            CaptureMiss::Receive(DecodeError::Again) => debug!("Decoder needs more input"),
            CaptureMiss::Receive(e) => debug!("No decoded frame: {}", e),
            CaptureMiss::Push(e) => warn!("Filter source refused frame: {}", e),
            CaptureMiss::Pull(e) => warn!("Filter sink failed: {}", e),
            CaptureMiss::Pending => debug!("Filter graph has no output yet"),
        }
    }
}

pub struct CaptureFilterPipeline {
    session: Option<Session>,
    overlay: OverlayConfig,
    tracker: Arc<ResourceTracker>,
    sequence: u64,
}

impl Default for CaptureFilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureFilterPipeline {
    pub fn new() -> Self {
        Self::with_overlay(OverlayConfig::default())
    }

    pub fn with_overlay(overlay: OverlayConfig) -> Self {
        registry::init();
        Self {
            session: None,
            overlay,
            tracker: ResourceTracker::new(),
            sequence: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        match self.session {
            Some(_) => PipelineState::Ready,
            None => PipelineState::Closed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    /// Live-resource counters for everything this pipeline has acquired
    pub fn resources(&self) -> Arc<ResourceTracker> {
        Arc::clone(&self.tracker)
    }

    /// Acquire device, decoder, buffers and filter graph. On error everything
    /// acquired so far is released and the pipeline stays closed.
    pub fn open(&mut self, config: &CaptureConfig) -> Result<()> {
        if self.session.is_some() {
            warn!("Open called on an open pipeline");
            return Err(PipelineError::AlreadyOpen);
        }

        info!(
            "Opening {} {:?} at {}x{} @ {} fps",
            config.driver, config.device, config.width, config.height, config.fps
        );
        let session = match self.acquire(config) {
            Ok(session) => session,
            Err(e) => {
                error!("Open failed: {}", e);
                return Err(e);
            }
        };

        info!("Pipeline ready on {}", session.device);
        self.session = Some(session);
        self.sequence = 0;
        Ok(())
    }

    fn acquire(&self, config: &CaptureConfig) -> Result<Session> {
        let tracker = &self.tracker;

        // 1. driver
        let driver = registry::find(&config.driver)
            .ok_or_else(|| PipelineError::DeviceNotFound(config.driver.clone()))?;

        // 2. device
        let options = config.device_options();
        let device_failed = |e: Report| PipelineError::DeviceOpenFailed {
            driver: driver.name().to_string(),
            device: config.device.clone(),
            reason: reason(&e),
        };
        let device = driver.open(&config.device, &options).map_err(device_failed)?;
        let mut input = Tracked::new(device, ResourceKind::Device, tracker);
        debug!("Opened {} with {}", config.device, driver.name());

        // 3. first video stream
        let streams = input.streams().map_err(device_failed)?;
        let stream = streams
            .into_iter()
            .find(|s| s.is_video())
            .ok_or_else(|| PipelineError::NoVideoTrack {
                device: config.device.clone(),
            })?;
        debug!(
            "Selected stream #{}: {} {}x{} time base {}",
            stream.index, stream.codec, stream.width, stream.height, stream.time_base
        );
        if (stream.width, stream.height) != (config.width, config.height) {
            return Err(PipelineError::DeviceOpenFailed {
                driver: driver.name().to_string(),
                device: config.device.clone(),
                reason: format!(
                    "device delivers {}x{}, requested {}x{}",
                    stream.width, stream.height, config.width, config.height
                ),
            });
        }

        // 4. decoder
        let kind = find_decoder(&stream.codec)
            .ok_or_else(|| PipelineError::DecoderUnavailable(stream.codec.to_string()))?;
        let decoder = kind
            .open(&stream)
            .map_err(|e| PipelineError::DecoderOpenFailed {
                codec: stream.codec.to_string(),
                reason: reason(&e),
            })?;
        let decoder = Tracked::new(decoder, ResourceKind::Decoder, tracker);

        debug!("Opened {} decoder", decoder.codec());

        // 5. frame buffers, tagged with what the decoder will produce
        let alloc_frame = || {
            FrameBuffer::alloc(PixelFormat::Yuyv422, stream.width, stream.height)
                .map_err(|e| PipelineError::AllocationFailed(reason(&e)))
        };
        let raw = Tracked::new(alloc_frame()?, ResourceKind::RawFrame, tracker);
        let watermarked = Tracked::new(alloc_frame()?, ResourceKind::WatermarkedFrame, tracker);

        // 6. filter graph
        let source = SourceParams {
            width: stream.width,
            height: stream.height,
            pixel_format: PixelFormat::Yuyv422,
            time_base: decoder.time_base(),
            pixel_aspect: Rational::new(1, 1),
        };
        let sink = SinkParams {
            pixel_formats: vec![PixelFormat::Yuyv422],
        };
        let description = watermark::session_description(&self.overlay);
        debug!("Overlay: {}", description);

        let mut graph = FilterGraph::new(source, sink);
        graph.parse(&description)?;
        graph.config()?;
        let graph = Tracked::new(graph, ResourceKind::FilterGraph, tracker);

        // 7. packet
        let capacity = raw.expected_len();
        let packet = Packet::alloc(capacity).map_err(|e| PipelineError::AllocationFailed(reason(&e)))?;
        let packet = Tracked::new(packet, ResourceKind::Packet, tracker);

        Ok(Session {
            graph,
            decoder,
            input,
            packet,
            raw,
            watermarked,
            stream_index: stream.index,
            device: config.device.clone(),
        })
    }

    /// Pull one watermarked frame. `None` when closed or when any stage has
    /// nothing to deliver this time; the pipeline stays ready either way.
    #[instrument(level = "trace", skip(self), fields(sequence = self.sequence))]
    pub fn capture(&mut self) -> Option<Frame> {
        let session = self.session.as_mut()?;

        let result = session.process(self.sequence);

        // Scratch buffers are left empty for the next call
        session.watermarked.unref();
        session.raw.unref();
        session.packet.unref();

        match result {
            Ok(frame) => {
                self.sequence += 1;
                metrics::counter!("ipcam_frames_captured_total").increment(1);
                Some(frame)
            }
            Err(miss) => {
                miss.log();
                metrics::counter!("ipcam_capture_misses_total", "stage" => miss.stage())
                    .increment(1);
                None
            }
        }
    }

    /// Release everything in teardown order. No-op when already closed.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Closing pipeline on {}", session.device);
            drop(session);
        }
    }
}

impl Session {
    fn process(&mut self, sequence: u64) -> std::result::Result<Frame, CaptureMiss> {
        self.input
            .read_packet(&mut self.packet)
            .map_err(CaptureMiss::Read)?;
        if self.packet.stream_index != self.stream_index {
            return Err(CaptureMiss::OtherStream(self.packet.stream_index));
        }

        self.decoder
            .send_packet(&self.packet)
            .map_err(CaptureMiss::Send)?;
        self.decoder
            .receive_frame(&mut self.raw)
            .map_err(CaptureMiss::Receive)?;
        self.raw.pts = self.raw.best_effort_timestamp;

        self.graph.push_frame(&self.raw).map_err(CaptureMiss::Push)?;
        if !self
            .graph
            .pull_frame(&mut self.watermarked)
            .map_err(CaptureMiss::Pull)?
        {
            return Err(CaptureMiss::Pending);
        }

        Ok(self.watermarked.to_frame(sequence))
    }
}

impl Drop for CaptureFilterPipeline {
    fn drop(&mut self) {
        self.close();
    }
}
