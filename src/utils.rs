use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::device::CodecId;

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub codec: String,
}

impl FoundDevice {
    pub fn new(path: String, codec: &CodecId) -> Self {
        Self {
            path,
            codec: codec.name().to_string(),
        }
    }
}

/// Auto-detect the first capture node, preferring ones that speak YUYV natively
pub fn auto_detect_device() -> Result<FoundDevice> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

    let mut fallback = None;
    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        for fmt in formats {
            if fmt.fourcc == FourCC::new(b"YUYV") {
                info!("Found YUYV device: {} - {}", path, caps.card);
                return Ok(FoundDevice::new(path, &CodecId::RawVideo));
            } else if fmt.fourcc == FourCC::new(b"MJPG") && fallback.is_none() {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                fallback = Some(FoundDevice::new(path.clone(), &CodecId::Mjpeg));
            }
        }
    }

    fallback.ok_or_else(|| eyre!("No suitable capture device found"))
}
