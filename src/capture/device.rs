//! Input driver and device seams
//!
//! A driver is looked up by name in the [`registry`](super::registry) and opens
//! devices by identifier. Devices report their stream layout once and then
//! hand out one compressed packet per read.

use std::fmt;
use std::time::Duration;

use color_eyre::Result;

use super::frame::{Packet, PixelFormat, Rational};

/// Named input driver (v4l2, gstreamer, test-pattern-source, ...)
pub trait InputDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Alternative names accepted by the registry
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn open(&self, device: &str, options: &DeviceOptions) -> Result<Box<dyn InputDevice>>;
}

/// An opened capture device
pub trait InputDevice: Send {
    /// Discover the track layout of the opened input
    fn streams(&mut self) -> Result<Vec<StreamInfo>>;

    /// Read the next packet into `packet`, blocking at most the configured read timeout
    fn read_packet(&mut self, packet: &mut Packet) -> Result<()>;
}

/// Explicit options passed to a driver when opening a device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    pub framerate: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Device-side read-ahead absorbing jitter between capture and consumption
    pub read_ahead_bytes: usize,
    pub read_timeout: Duration,
}

impl DeviceOptions {
    pub fn video_size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn frame_size(&self) -> Option<usize> {
        self.pixel_format.frame_size(self.width, self.height)
    }

    /// How many whole frames fit in the read-ahead budget, clamped to `min..=max`
    pub fn buffer_count(&self, min: u32, max: u32) -> u32 {
        let frames = match self.frame_size() {
            Some(size) if size > 0 => self.read_ahead_bytes / size,
            _ => 0,
        };
        (frames.min(u32::MAX as usize) as u32).clamp(min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecId {
    /// Uncompressed frames, one image per packet
    RawVideo,
    Mjpeg,
    Other(String),
}

impl CodecId {
    pub fn name(&self) -> &str {
        match self {
            CodecId::RawVideo => "rawvideo",
            CodecId::Mjpeg => "mjpeg",
            CodecId::Other(name) => name,
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One track of an opened input
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: CodecId,
    /// Layout of uncompressed payloads, when the codec is raw
    pub pixel_format: Option<PixelFormat>,
    pub width: u32,
    pub height: u32,
    pub time_base: Rational,
    pub frame_rate: Rational,
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(read_ahead_bytes: usize) -> DeviceOptions {
        DeviceOptions {
            framerate: 30,
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Yuyv422,
            read_ahead_bytes,
            read_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn buffer_count_follows_read_ahead() {
        let frame = 640 * 480 * 2;
        assert_eq!(options(frame * 6).buffer_count(2, 32), 6);
        assert_eq!(options(0).buffer_count(2, 32), 2);
        assert_eq!(options(2000 << 20).buffer_count(2, 32), 32);
    }

    #[test]
    fn video_size_is_w_x_h() {
        assert_eq!(options(0).video_size(), "640x480");
    }
}
