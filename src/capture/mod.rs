pub mod colorspace;
pub mod decoder;
pub mod device;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod registry;
pub mod synthetic;
pub mod timestamp;
pub mod v4l2;

pub use device::{DeviceOptions, InputDevice, InputDriver, StreamInfo};
pub use frame::{Frame, FrameBuffer, Packet, PixelFormat, Rational};
