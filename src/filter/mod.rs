//! Filter graph: buffer source -> parsed filter chain -> buffer sink
//!
//! Frames pushed into the source are copied into graph-owned buffers, so the
//! caller's buffer stays valid for reuse. Filtering happens lazily when the
//! sink is pulled.

pub mod drawtext;
pub mod font;
pub mod parse;
pub mod watermark;

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::frame::{FrameBuffer, PixelFormat, Rational};
use drawtext::DrawText;
use parse::{parse_chain, FilterSpec};

/// Frames the source will hold before dropping the oldest
const MAX_QUEUED: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("empty filter graph description")]
    Empty,
    #[error("syntax error at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("no such filter: {0}")]
    UnknownFilter(String),
    #[error("{filter}: unknown option {option:?}")]
    UnknownOption { filter: String, option: String },
    #[error("{filter}: invalid value {value:?} for {option}")]
    InvalidValue {
        filter: String,
        option: String,
        value: String,
    },
    #[error("{filter}: missing required option {option}")]
    MissingOption {
        filter: String,
        option: &'static str,
    },
    #[error("pixel format {0} is not accepted")]
    FormatNotAccepted(PixelFormat),
    #[error("invalid source parameters: {0}")]
    InvalidSource(String),
    #[error("frame {got} does not match source {expected}")]
    FrameMismatch { got: String, expected: String },
    #[error("filter graph is not configured")]
    NotConfigured,
}

/// In-place video filter. Output keeps the input's format and geometry.
pub trait VideoFilter: Send {
    fn name(&self) -> &'static str;

    /// Validate against the negotiated input
    fn config(&mut self, input: &SourceParams) -> Result<(), FilterError>;

    fn filter(&mut self, frame: &mut FrameBuffer) -> Result<(), FilterError>;
}

/// Passes frames through untouched
pub struct NullFilter;

impl VideoFilter for NullFilter {
    fn name(&self) -> &'static str {
        "null"
    }

    fn config(&mut self, _input: &SourceParams) -> Result<(), FilterError> {
        Ok(())
    }

    fn filter(&mut self, _frame: &mut FrameBuffer) -> Result<(), FilterError> {
        Ok(())
    }
}

pub fn create_filter(spec: &FilterSpec) -> Result<Box<dyn VideoFilter>, FilterError> {
    match spec.name.as_str() {
        "drawtext" => Ok(Box::new(DrawText::from_options(&spec.options)?)),
        "null" | "copy" => match spec.options.first() {
            Some(option) => Err(FilterError::UnknownOption {
                filter: spec.name.clone(),
                option: option.key.clone().unwrap_or_else(|| option.value.clone()),
            }),
            None => Ok(Box::new(NullFilter)),
        },
        other => Err(FilterError::UnknownFilter(other.to_string())),
    }
}

/// Parameters of the buffer source node
#[derive(Debug, Clone, PartialEq)]
pub struct SourceParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub time_base: Rational,
    pub pixel_aspect: Rational,
}

impl SourceParams {
    pub fn to_args(&self) -> String {
        format!(
            "video_size={}x{}:pix_fmt={}:time_base={}:pixel_aspect={}",
            self.width, self.height, self.pixel_format, self.time_base, self.pixel_aspect
        )
    }

    fn validate(&self) -> Result<(), FilterError> {
        if self.width == 0 || self.height == 0 {
            return Err(FilterError::InvalidSource(format!(
                "video_size={}x{}",
                self.width, self.height
            )));
        }
        // 4:2:2 pixels come in pairs sharing one chroma sample
        if self.pixel_format == PixelFormat::Yuyv422 && self.width % 2 != 0 {
            return Err(FilterError::InvalidSource(format!(
                "video_size={}x{}: odd width for {}",
                self.width, self.height, self.pixel_format
            )));
        }
        if !self.time_base.is_valid() {
            return Err(FilterError::InvalidSource(format!(
                "time_base={}",
                self.time_base
            )));
        }
        if !self.pixel_aspect.is_valid() {
            return Err(FilterError::InvalidSource(format!(
                "pixel_aspect={}",
                self.pixel_aspect
            )));
        }
        Ok(())
    }

    fn describe_frame(frame: &FrameBuffer) -> String {
        format!("{}x{} {}", frame.width, frame.height, frame.format)
    }

    fn matches(&self, frame: &FrameBuffer) -> bool {
        frame.width == self.width
            && frame.height == self.height
            && frame.format == self.pixel_format
            && frame.data.len() == frame.expected_len()
    }
}

/// Parameters of the buffer sink node
#[derive(Debug, Clone, PartialEq)]
pub struct SinkParams {
    pub pixel_formats: Vec<PixelFormat>,
}

/// Source queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub frames_written: usize,
    pub frames_read: usize,
    pub frames_dropped: usize,
}

pub struct FilterGraph {
    source: SourceParams,
    sink: SinkParams,
    chain: Vec<Box<dyn VideoFilter>>,
    /// Frames pushed but not yet pulled, oldest first
    queue: HeapRb<FrameBuffer>,
    spare: Vec<FrameBuffer>,
    stats: QueueStats,
    configured: bool,
}

impl FilterGraph {
    pub fn new(source: SourceParams, sink: SinkParams) -> Self {
        Self {
            source,
            sink,
            chain: Vec::new(),
            queue: HeapRb::new(MAX_QUEUED),
            spare: Vec::new(),
            stats: QueueStats::default(),
            configured: false,
        }
    }

    /// Instantiate the filters of `description` between source and sink
    pub fn parse(&mut self, description: &str) -> Result<(), FilterError> {
        let specs = parse_chain(description)?;
        let chain = specs
            .iter()
            .map(create_filter)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Parsed filter chain: {}",
            chain.iter().map(|f| f.name()).collect::<Vec<_>>().join(" -> ")
        );
        self.chain = chain;
        self.configured = false;
        Ok(())
    }

    /// Validate links and formats. Frames can only flow after this succeeds.
    pub fn config(&mut self) -> Result<(), FilterError> {
        self.source.validate()?;
        for filter in &mut self.chain {
            filter.config(&self.source)?;
        }
        // Filters never change the format, so the sink sees the source format
        if !self.sink.pixel_formats.contains(&self.source.pixel_format) {
            return Err(FilterError::FormatNotAccepted(self.source.pixel_format));
        }

        info!("Filter graph configured: {}", self.source.to_args());
        self.configured = true;
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.queue.occupied_len()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Push a copy of `frame` into the source. The caller keeps `frame`.
    pub fn push_frame(&mut self, frame: &FrameBuffer) -> Result<(), FilterError> {
        if !self.configured {
            return Err(FilterError::NotConfigured);
        }
        if !self.source.matches(frame) {
            return Err(FilterError::FrameMismatch {
                got: SourceParams::describe_frame(frame),
                expected: self.source.to_args(),
            });
        }

        let copy = match self.spare.pop() {
            Some(mut buffer) => {
                buffer.copy_from(frame);
                buffer
            }
            None => frame.clone(),
        };

        // Drop oldest frame
        if let Some(dropped) = self.queue.push_overwrite(copy) {
            warn!("Filter source is full, dropped the oldest frame");
            self.stats.frames_dropped += 1;
            self.recycle(dropped);
        }
        self.stats.frames_written += 1;
        Ok(())
    }

    /// Pull the next filtered frame into `out`. `Ok(false)` means nothing is ready yet.
    pub fn pull_frame(&mut self, out: &mut FrameBuffer) -> Result<bool, FilterError> {
        if !self.configured {
            return Err(FilterError::NotConfigured);
        }
        let Some(mut frame) = self.queue.try_pop() else {
            return Ok(false);
        };
        self.stats.frames_read += 1;

        for filter in &mut self.chain {
            if let Err(e) = filter.filter(&mut frame) {
                self.recycle(frame);
                return Err(e);
            }
        }

        std::mem::swap(out, &mut frame);
        self.recycle(frame);
        Ok(true)
    }

    fn recycle(&mut self, mut buffer: FrameBuffer) {
        buffer.unref();
        if self.spare.len() < MAX_QUEUED {
            self.spare.push(buffer);
        }
    }
}
