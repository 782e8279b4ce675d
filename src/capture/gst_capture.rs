//! GStreamer-based capture driver
//!
//! The device identifier is a GStreamer source description, e.g.
//! `v4l2src device=/dev/video0` or `videotestsrc is-live=true`. Whatever it
//! produces is converted to YUY2 at the requested geometry and pulled from an
//! appsink.

use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::capture::device::{
    CodecId, DeviceOptions, InputDevice, InputDriver, MediaKind, StreamInfo,
};
use crate::capture::frame::{Packet, PixelFormat, Rational};

/// GStreamer clock times are nanoseconds
const TIME_BASE: Rational = Rational::new(1, 1_000_000_000);

pub struct GstDriver;

impl InputDriver for GstDriver {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["gst"]
    }

    fn open(&self, device: &str, options: &DeviceOptions) -> Result<Box<dyn InputDevice>> {
        let mut capture = GstCapture::new(device, options)?;
        capture.start_stream()?;
        Ok(Box::new(capture))
    }
}

/// GStreamer capture pulling converted YUY2 frames from an appsink
pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    width: u32,
    height: u32,
    fps: u32,
    timeout: gst::ClockTime,
}

impl GstCapture {
    pub fn new(source: &str, options: &DeviceOptions) -> Result<Self> {
        // Initialize GStreamer
        gst::init().map_err(|e| eyre!("Failed to initialize GStreamer: {}", e))?;

        info!("Initializing GStreamer capture pipeline");

        let pipeline_str = Self::build_pipeline_string(source, options)?;
        info!("Pipeline: {}", pipeline_str);

        // Create pipeline from string
        let pipeline = gst::parse::launch(&pipeline_str)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| eyre!("Failed to create pipeline"))?;

        // Get appsink element
        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| eyre!("Failed to find appsink element"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| eyre!("Failed to cast to AppSink"))?;

        // The queue in front of the sink is the read-ahead, keep the sink itself shallow
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("drop", false);
        appsink.set_property("sync", false);

        Ok(Self {
            pipeline,
            appsink,
            width: options.width,
            height: options.height,
            fps: options.framerate,
            timeout: gst::ClockTime::from_mseconds(options.read_timeout.as_millis() as u64),
        })
    }

    fn build_pipeline_string(source: &str, options: &DeviceOptions) -> Result<String> {
        if source.trim().is_empty() {
            return Err(eyre!("Empty GStreamer source description"));
        }
        if options.width == 0 || options.height == 0 || options.framerate == 0 {
            return Err(eyre!(
                "Invalid capture mode {} @ {} fps",
                options.video_size(),
                options.framerate
            ));
        }
        let format = match options.pixel_format {
            PixelFormat::Yuyv422 => "YUY2",
        };

        Ok(format!(
            "{} ! \
             videoconvert ! videoscale ! videorate ! \
             video/x-raw,format={},width={},height={},framerate={}/1 ! \
             queue max-size-buffers=0 max-size-time=0 max-size-bytes={} leaky=downstream ! \
             appsink name=appsink",
            source,
            format,
            options.width,
            options.height,
            options.framerate,
            options.read_ahead_bytes.min(u32::MAX as usize)
        ))
    }

    /// Start the capture pipeline
    pub fn start_stream(&mut self) -> Result<()> {
        info!("Starting GStreamer pipeline");

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| eyre!("Failed to start pipeline: {:?}", e))?;

        // Wait for pipeline to reach playing state
        let (state_change, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));

        match state_change {
            Ok(gst::StateChangeSuccess::Success) => {
                info!("Pipeline started successfully");
                Ok(())
            }
            Ok(gst::StateChangeSuccess::Async) | Ok(gst::StateChangeSuccess::NoPreroll) => {
                info!("Pipeline starting asynchronously");
                Ok(())
            }
            Err(_) => Err(eyre!("Failed to start pipeline")),
        }
    }

    /// Stop the capture pipeline
    fn stop_stream(&mut self) -> Result<()> {
        info!("Stopping GStreamer pipeline");

        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| eyre!("Failed to stop pipeline: {:?}", e))?;

        Ok(())
    }
}

impl InputDevice for GstCapture {
    fn streams(&mut self) -> Result<Vec<StreamInfo>> {
        // Caps are pinned by the capsfilter, so the layout is known before the first sample
        Ok(vec![StreamInfo {
            index: 0,
            kind: MediaKind::Video,
            codec: CodecId::RawVideo,
            pixel_format: Some(PixelFormat::Yuyv422),
            width: self.width,
            height: self.height,
            time_base: TIME_BASE,
            frame_rate: Rational::new(self.fps as i32, 1),
        }])
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<()> {
        let sample = self
            .appsink
            .try_pull_sample(self.timeout)
            .ok_or_else(|| eyre!("No sample within {}", self.timeout))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| eyre!("Sample contains no buffer"))?;

        let caps = sample.caps().ok_or_else(|| eyre!("Sample has no caps"))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| eyre!("Failed to parse video info from caps"))?;
        if video_info.width() != self.width || video_info.height() != self.height {
            warn!(
                "Dropping {}x{} sample, expected {}x{}",
                video_info.width(),
                video_info.height(),
                self.width,
                self.height
            );
            return Err(eyre!("Unexpected sample geometry"));
        }

        let map = buffer
            .map_readable()
            .map_err(|_| eyre!("Failed to map buffer"))?;

        // Repack if the element padded the rows
        let row = self.width as usize * 2;
        let stride = video_info.stride()[0] as usize;
        if stride < row || map.len() < stride * (self.height as usize - 1) + row {
            return Err(eyre!("Short buffer of {} bytes", map.len()));
        }
        packet.data.clear();
        if stride == row {
            packet.data.extend_from_slice(&map[..row * self.height as usize]);
        } else {
            debug!("Repacking rows with stride {}", stride);
            for line in map.chunks(stride).take(self.height as usize) {
                packet.data.extend_from_slice(&line[..row]);
            }
        }

        packet.pts = buffer.pts().map(|pts| pts.nseconds() as i64);
        packet.dts = buffer.dts().map(|dts| dts.nseconds() as i64);
        packet.duration = buffer
            .duration()
            .map(|d| d.nseconds() as i64)
            .unwrap_or(1_000_000_000 / self.fps.max(1) as i64);
        packet.stream_index = 0;
        Ok(())
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn pipeline_string_pins_caps_and_read_ahead() {
        let options = DeviceOptions {
            framerate: 30,
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Yuyv422,
            read_ahead_bytes: 4096,
            read_timeout: Duration::from_secs(1),
        };
        let desc = GstCapture::build_pipeline_string("videotestsrc", &options).unwrap();
        assert!(desc.starts_with("videotestsrc ! "));
        assert!(desc.contains("format=YUY2,width=640,height=480,framerate=30/1"));
        assert!(desc.contains("max-size-bytes=4096"));
        assert!(GstCapture::build_pipeline_string("  ", &options).is_err());
    }
}
