use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Frame data handed to the caller, independent of the pipeline's scratch buffers
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn pts(&self) -> Option<i64> {
        self.meta.pts
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub pts: Option<i64>,
    pub time_base: Rational,
}

/// Pixel formats we support. Packed 4:2:2 is the only layout the pipeline carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Y0 U Y1 V, two bytes per pixel
    Yuyv422,
}

impl PixelFormat {
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Yuyv422 => "yuyv422",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "yuyv422" | "yuy2" | "YUY2" | "YUYV" => Some(PixelFormat::Yuyv422),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Yuyv422 => 2,
        }
    }

    /// Line size in bytes, `None` on overflow
    pub fn stride(self, width: u32) -> Option<usize> {
        (width as usize).checked_mul(self.bytes_per_pixel())
    }

    /// Image size in bytes, `None` on overflow
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        self.stride(width)?.checked_mul(height as usize)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rational number used for time bases and aspect ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn invert(self) -> Self {
        Self::new(self.den, self.num)
    }

    /// Rescale `ts` from this time base into `to`, rounding to nearest
    pub fn rescale(self, ts: i64, to: Rational) -> i64 {
        let num = ts as i128 * self.num as i128 * to.den as i128;
        let den = self.den as i128 * to.num as i128;
        if den == 0 {
            return 0;
        }
        let half = den.abs() / 2;
        let rounded = if num >= 0 { num + half } else { num - half };
        (rounded / den) as i64
    }

    pub fn seconds(self, ts: i64) -> f64 {
        ts as f64 * self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl std::str::FromStr for Rational {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, den) = s
            .split_once('/')
            .ok_or_else(|| format!("expected num/den, got {s:?}"))?;
        let num = num.trim().parse().map_err(|_| format!("bad numerator in {s:?}"))?;
        let den = den.trim().parse().map_err(|_| format!("bad denominator in {s:?}"))?;
        Ok(Self::new(num, den))
    }
}

/// One compressed access unit read from an input device. Reused across reads.
#[derive(Debug, Default)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub stream_index: usize,
}

impl Packet {
    /// Allocate a packet able to hold `capacity` bytes without reallocating
    pub fn alloc(capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|e| eyre!("packet of {} bytes: {}", capacity, e))?;
        Ok(Self {
            data,
            ..Self::default()
        })
    }

    /// Drop the payload and timing, keeping the allocation
    pub fn unref(&mut self) {
        self.data.clear();
        self.pts = None;
        self.dts = None;
        self.duration = 0;
        self.stream_index = 0;
    }
}

/// Reusable decoded image buffer. The pipeline owns two of these per session.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub pkt_dts: Option<i64>,
    pub best_effort_timestamp: Option<i64>,
    pub time_base: Rational,
}

impl FrameBuffer {
    /// Tag a buffer with format and geometry and reserve room for one image
    pub fn alloc(format: PixelFormat, width: u32, height: u32) -> Result<Self> {
        let size = format
            .frame_size(width, height)
            .ok_or_else(|| eyre!("{}x{} {} frame size overflows", width, height, format))?;
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| eyre!("{}x{} {} frame: {}", width, height, format, e))?;

        Ok(Self {
            format,
            width,
            height,
            data,
            pts: None,
            pkt_dts: None,
            best_effort_timestamp: None,
            time_base: Rational::new(0, 1),
        })
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn expected_len(&self) -> usize {
        self.stride() * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Release the image contents, keeping tags and allocation
    pub fn unref(&mut self) {
        self.data.clear();
        self.pts = None;
        self.pkt_dts = None;
        self.best_effort_timestamp = None;
    }

    /// Copy contents and timing from `other` into this buffer
    pub fn copy_from(&mut self, other: &FrameBuffer) {
        self.format = other.format;
        self.width = other.width;
        self.height = other.height;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
        self.pts = other.pts;
        self.pkt_dts = other.pkt_dts;
        self.best_effort_timestamp = other.best_effort_timestamp;
        self.time_base = other.time_base;
    }

    /// Independent caller-owned copy
    pub fn to_frame(&self, sequence: u64) -> Frame {
        Frame {
            data: Bytes::copy_from_slice(&self.data),
            meta: Arc::new(FrameMetadata {
                sequence,
                width: self.width,
                height: self.height,
                stride: self.stride() as u32,
                format: self.format,
                pts: self.pts,
                time_base: self.time_base,
            }),
        }
    }
}
