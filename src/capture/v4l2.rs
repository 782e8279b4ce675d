//! V4L2 capture driver

use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::device::{
    CodecId, DeviceOptions, InputDevice, InputDriver, MediaKind, StreamInfo,
};
use crate::capture::frame::{Packet, PixelFormat, Rational};
use crate::utils;

/// Kernel timestamps are reported in microseconds
const TIME_BASE: Rational = Rational::new(1, 1_000_000);
const MIN_BUFFERS: u32 = 2;
const MAX_BUFFERS: u32 = 32;

pub struct V4l2Driver;

impl InputDriver for V4l2Driver {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["video4linux2"]
    }

    fn open(&self, device: &str, options: &DeviceOptions) -> Result<Box<dyn InputDevice>> {
        let path = if device.is_empty() {
            let found = utils::auto_detect_device()?;
            info!("Using auto-detected {} ({})", found.path, found.codec);
            found.path
        } else {
            device.to_string()
        };
        Ok(Box::new(V4l2Capture::new(&path, options)?))
    }
}

/// Memory-mapped V4L2 capture
pub struct V4l2Capture {
    // Declared before the device so buffers are unmapped first
    stream: MmapStream<'static>,
    _device: Box<Device>,
    codec: CodecId,
    width: u32,
    height: u32,
    fps: u32,
}

impl V4l2Capture {
    pub fn new(path: &str, options: &DeviceOptions) -> Result<Self> {
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(path)?;

        // Query capabilities
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        // Set format
        let mut fmt = device.format()?;
        fmt.width = options.width;
        fmt.height = options.height;
        fmt.fourcc = match options.pixel_format {
            PixelFormat::Yuyv422 => FourCC::new(b"YUYV"),
        };
        let fmt = device.set_format(&fmt)?;

        // Drivers may substitute a format they prefer; accept MJPEG and decode it ourselves
        let codec = if fmt.fourcc == FourCC::new(b"YUYV") {
            CodecId::RawVideo
        } else if fmt.fourcc == FourCC::new(b"MJPG") {
            warn!("Device refused YUYV, capturing MJPEG instead");
            CodecId::Mjpeg
        } else {
            return Err(eyre!("Unsupported pixel format {}", fmt.fourcc));
        };
        if fmt.width != options.width || fmt.height != options.height {
            warn!(
                "Device offers {}x{}, requested {}",
                fmt.width,
                fmt.height,
                options.video_size()
            );
        }

        let params = device.set_params(&Parameters::with_fps(options.framerate))?;
        info!("Frame interval: {:?}", params.interval);

        // Read-ahead is expressed as a number of queued kernel buffers
        let buffer_count = options.buffer_count(MIN_BUFFERS, MAX_BUFFERS);
        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count)?;
        stream.set_timeout(options.read_timeout);

        info!("Capture stream started with {} buffers", buffer_count);

        Ok(Self {
            stream,
            _device: Box::new(device),
            codec,
            width: fmt.width,
            height: fmt.height,
            fps: options.framerate,
        })
    }
}

impl InputDevice for V4l2Capture {
    fn streams(&mut self) -> Result<Vec<StreamInfo>> {
        Ok(vec![StreamInfo {
            index: 0,
            kind: MediaKind::Video,
            pixel_format: (self.codec == CodecId::RawVideo).then_some(PixelFormat::Yuyv422),
            codec: self.codec.clone(),
            width: self.width,
            height: self.height,
            time_base: TIME_BASE,
            frame_rate: Rational::new(self.fps as i32, 1),
        }])
    }

    #[instrument(level = "trace", skip_all)]
    fn read_packet(&mut self, packet: &mut Packet) -> Result<()> {
        let (buf, meta) = self.stream.next()?;

        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        packet.data.clear();
        packet.data.extend_from_slice(&buf[..used]);

        let micros = meta.timestamp.sec as i64 * 1_000_000 + meta.timestamp.usec as i64;
        packet.pts = (micros > 0).then_some(micros);
        packet.dts = packet.pts;
        packet.duration = TIME_BASE.invert().num as i64 / self.fps.max(1) as i64;
        packet.stream_index = 0;
        Ok(())
    }
}
