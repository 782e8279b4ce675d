//! Synthetic test-pattern input
//!
//! Produces 75% colour bars with a white marker that moves a few pixels per
//! frame, as uncompressed YUYV packets. Needs no hardware, so it backs the
//! test suite and dry runs.

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use super::colorspace::{rgb_to_yuv, Yuv};
use super::device::{CodecId, DeviceOptions, InputDevice, InputDriver, MediaKind, StreamInfo};
use super::frame::{Packet, PixelFormat, Rational};

pub const DRIVER_NAME: &str = "test-pattern-source";

const DEVICE_PREFIX: &str = "synthetic";
const MARKER_WIDTH: u32 = 8;
const MARKER_STEP: u32 = 4;

const BARS: [(u8, u8, u8); 8] = [
    (191, 191, 191),
    (191, 191, 0),
    (0, 191, 191),
    (0, 191, 0),
    (191, 0, 191),
    (191, 0, 0),
    (0, 0, 191),
    (0, 0, 0),
];

pub struct TestPatternDriver;

impl InputDriver for TestPatternDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["lavfi-testsrc"]
    }

    fn open(&self, device: &str, options: &DeviceOptions) -> Result<Box<dyn InputDevice>> {
        let phase = device
            .strip_prefix(DEVICE_PREFIX)
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| eyre!("Unknown synthetic device {:?}", device))?;

        if options.pixel_format != PixelFormat::Yuyv422 {
            return Err(eyre!("Unsupported pixel format {}", options.pixel_format));
        }
        if options.width == 0 || options.height == 0 || options.width % 2 != 0 {
            return Err(eyre!("Invalid video size {}", options.video_size()));
        }
        if options.framerate == 0 {
            return Err(eyre!("Invalid frame rate 0"));
        }

        info!(
            "Opened {} {} @ {} fps",
            device,
            options.video_size(),
            options.framerate
        );

        Ok(Box::new(SyntheticDevice {
            width: options.width,
            height: options.height,
            fps: options.framerate,
            phase,
            frame_index: 0,
            bars: BARS.map(|(r, g, b)| rgb_to_yuv(r, g, b)),
        }))
    }
}

pub struct SyntheticDevice {
    width: u32,
    height: u32,
    fps: u32,
    phase: u32,
    frame_index: i64,
    bars: [Yuv; 8],
}

impl SyntheticDevice {
    fn marker_x(&self) -> u32 {
        let travel = self.width.saturating_sub(MARKER_WIDTH).max(1);
        ((self.frame_index as u64 * MARKER_STEP as u64 + self.phase as u64 * 16) % travel as u64)
            as u32
            & !1
    }

    fn color_at(&self, x: u32, marker_x: u32) -> Yuv {
        if x >= marker_x && x < marker_x + MARKER_WIDTH {
            return rgb_to_yuv(255, 255, 255);
        }
        let bar = (x as u64 * self.bars.len() as u64 / self.width as u64) as usize;
        self.bars[bar.min(self.bars.len() - 1)]
    }
}

impl InputDevice for SyntheticDevice {
    fn streams(&mut self) -> Result<Vec<StreamInfo>> {
        Ok(vec![StreamInfo {
            index: 0,
            kind: MediaKind::Video,
            codec: CodecId::RawVideo,
            pixel_format: Some(PixelFormat::Yuyv422),
            width: self.width,
            height: self.height,
            time_base: Rational::new(1, self.fps as i32),
            frame_rate: Rational::new(self.fps as i32, 1),
        }])
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<()> {
        let size = PixelFormat::Yuyv422
            .frame_size(self.width, self.height)
            .ok_or_else(|| eyre!("Frame size overflows"))?;
        packet.data.clear();
        packet
            .data
            .try_reserve(size)
            .map_err(|e| eyre!("Cannot grow packet: {}", e))?;

        let marker_x = self.marker_x();
        let mut row = Vec::with_capacity(self.width as usize * 2);
        for x in (0..self.width).step_by(2) {
            let a = self.color_at(x, marker_x);
            let b = self.color_at(x + 1, marker_x);
            row.extend_from_slice(&[a.y, a.u, b.y, a.v]);
        }
        for _ in 0..self.height {
            packet.data.extend_from_slice(&row);
        }

        packet.pts = Some(self.frame_index);
        packet.dts = Some(self.frame_index);
        packet.duration = 1;
        packet.stream_index = 0;
        self.frame_index += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn options(width: u32, height: u32) -> DeviceOptions {
        DeviceOptions {
            framerate: 30,
            width,
            height,
            pixel_format: PixelFormat::Yuyv422,
            read_ahead_bytes: 0,
            read_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn rejects_unknown_device_names() {
        assert!(TestPatternDriver.open("camera0", &options(64, 48)).is_err());
        assert!(TestPatternDriver.open("synthetic", &options(64, 48)).is_err());
        assert!(TestPatternDriver.open("synthetic0", &options(63, 48)).is_err());
    }

    #[test]
    fn packets_are_full_frames_with_rising_pts() {
        let mut dev = TestPatternDriver.open("synthetic0", &options(64, 48)).unwrap();
        let streams = dev.streams().unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].time_base, Rational::new(1, 30));

        let mut packet = Packet::default();
        dev.read_packet(&mut packet).unwrap();
        assert_eq!(packet.data.len(), 64 * 48 * 2);
        assert_eq!(packet.pts, Some(0));
        let first = packet.data.clone();

        dev.read_packet(&mut packet).unwrap();
        assert_eq!(packet.pts, Some(1));
        assert_ne!(first, packet.data, "marker should move between frames");
    }
}
