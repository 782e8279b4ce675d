//! GStreamer delivery through an appsrc
//!
//! Outbound buffers are pushed into `appsrc ! <launch>`, where the launch
//! description does encoding and transport (x264 over RTP to UDP by default).

use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, error, info, warn};

use super::{FrameSink, OutboundBuffer, DEFAULT_LAUNCH};

pub struct GstSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    frame_size: usize,
}

impl GstSink {
    pub fn new(launch: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        gst::init().map_err(|e| eyre!("Failed to initialize GStreamer: {}", e))?;

        let launch = if launch.trim().is_empty() {
            DEFAULT_LAUNCH
        } else {
            launch
        };
        let pipeline_str = format!("appsrc name=ipcam_src ! {}", launch);
        info!("Delivery pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| eyre!("Failed to create pipeline"))?;

        let appsrc = pipeline
            .by_name("ipcam_src")
            .ok_or_else(|| eyre!("Failed to find appsrc element"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| eyre!("Failed to cast to AppSrc"))?;

        let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Yuy2, width, height)
            .fps(gst::Fraction::new(fps as i32, 1))
            .build()
            .map_err(|e| eyre!("Invalid output format {}x{}@{}: {}", width, height, fps, e))?;
        let caps = info
            .to_caps()
            .map_err(|e| eyre!("Failed to build caps: {}", e))?;

        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| eyre!("Failed to start delivery pipeline: {}", e))?;

        Ok(Self {
            pipeline,
            appsrc,
            frame_size: info.size(),
        })
    }
}

impl FrameSink for GstSink {
    fn push(&mut self, buffer: &OutboundBuffer) -> Result<()> {
        if buffer.data.len() != self.frame_size {
            return Err(eyre!(
                "Buffer of {} bytes, caps expect {}",
                buffer.data.len(),
                self.frame_size
            ));
        }

        let mut gst_buffer = gst::Buffer::with_size(self.frame_size)
            .map_err(|e| eyre!("Failed to allocate buffer: {}", e))?;
        {
            let buffer_ref = gst_buffer
                .get_mut()
                .ok_or_else(|| eyre!("Failed to get mutable buffer reference"))?;
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(buffer.pts.as_nanos() as u64));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(
                buffer.duration.as_nanos() as u64,
            ));
            let mut map = buffer_ref
                .map_writable()
                .map_err(|e| eyre!("Failed to map buffer: {}", e))?;
            map.copy_from_slice(&buffer.data);
        }

        self.appsrc.push_buffer(gst_buffer).map_err(|e| {
            warn!(?e, "Failed to push buffer");
            eyre!("appsrc refused buffer: {:?}", e)
        })?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        debug!("Stopping delivery pipeline");
        self.appsrc
            .end_of_stream()
            .map_err(|e| eyre!("Failed to send EOS: {:?}", e))?;
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| eyre!("Failed to stop delivery pipeline: {}", e))?;
        Ok(())
    }
}

impl Drop for GstSink {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            error!(?e, "Failed to set delivery pipeline to Null on drop");
        }
    }
}
