//! Decoders turning capture packets into packed 4:2:2 frames

use color_eyre::{eyre::eyre, Result};
use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat as JpegPixelFormat};
use thiserror::Error;

use super::colorspace::{gray_to_yuyv, rgb24_to_yuyv};
use super::device::{CodecId, StreamInfo};
use super::frame::{FrameBuffer, Packet, PixelFormat, Rational};
use super::timestamp::BestEffortTimestamp;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// No frame yet, feed more packets
    #[error("decoder needs more input")]
    Again,
    /// A decoded frame is waiting, receive it first
    #[error("decoder output is full")]
    Full,
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Send/receive decoder over one stream
pub trait Decoder: Send {
    fn codec(&self) -> &CodecId;

    fn time_base(&self) -> Rational;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError>;

    fn receive_frame(&mut self, frame: &mut FrameBuffer) -> Result<(), DecodeError>;
}

/// Decoders we know how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    RawVideo,
    Mjpeg,
}

pub fn find_decoder(codec: &CodecId) -> Option<DecoderKind> {
    match codec {
        CodecId::RawVideo => Some(DecoderKind::RawVideo),
        CodecId::Mjpeg => Some(DecoderKind::Mjpeg),
        CodecId::Other(_) => None,
    }
}

impl DecoderKind {
    /// Instantiate for `stream`. The decoder's time base is copied from the stream.
    pub fn open(self, stream: &StreamInfo) -> Result<Box<dyn Decoder>> {
        if stream.width == 0 || stream.height == 0 || stream.width % 2 != 0 {
            return Err(eyre!(
                "Unusable stream geometry {}x{}",
                stream.width,
                stream.height
            ));
        }
        if !stream.time_base.is_valid() {
            return Err(eyre!("Invalid stream time base {}", stream.time_base));
        }

        let state = DecoderState {
            codec: stream.codec.clone(),
            time_base: stream.time_base,
            width: stream.width,
            height: stream.height,
            pending: Vec::new(),
            has_pending: false,
            pending_pts: None,
            pending_dts: None,
            pending_duration: 0,
            timestamps: BestEffortTimestamp::new(),
        };

        match self {
            DecoderKind::RawVideo => match stream.pixel_format {
                Some(PixelFormat::Yuyv422) => Ok(Box::new(RawVideoDecoder { state })),
                None => Err(eyre!("Raw stream without a pixel format")),
            },
            DecoderKind::Mjpeg => Ok(Box::new(MjpegDecoder { state })),
        }
    }
}

/// Bookkeeping shared by the decoders: one pending packet at a time
struct DecoderState {
    codec: CodecId,
    time_base: Rational,
    width: u32,
    height: u32,
    pending: Vec<u8>,
    has_pending: bool,
    pending_pts: Option<i64>,
    pending_dts: Option<i64>,
    pending_duration: i64,
    timestamps: BestEffortTimestamp,
}

impl DecoderState {
    fn accept(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        if self.has_pending {
            return Err(DecodeError::Full);
        }
        if packet.data.is_empty() {
            return Err(DecodeError::InvalidData("empty packet".into()));
        }
        self.pending.clear();
        self.pending.extend_from_slice(&packet.data);
        self.pending_pts = packet.pts;
        self.pending_dts = packet.dts;
        self.pending_duration = packet.duration;
        self.has_pending = true;
        Ok(())
    }

    fn take(&mut self) -> Result<(), DecodeError> {
        if !self.has_pending {
            return Err(DecodeError::Again);
        }
        self.has_pending = false;
        Ok(())
    }

    fn stamp(&mut self, frame: &mut FrameBuffer) {
        frame.format = PixelFormat::Yuyv422;
        frame.width = self.width;
        frame.height = self.height;
        frame.time_base = self.time_base;
        frame.pts = self.pending_pts;
        frame.pkt_dts = self.pending_dts;
        frame.best_effort_timestamp = Some(self.timestamps.guess(
            self.pending_pts,
            self.pending_dts,
            self.pending_duration,
        ));
    }
}

/// YUYV packets are already frames
pub struct RawVideoDecoder {
    state: DecoderState,
}

impl Decoder for RawVideoDecoder {
    fn codec(&self) -> &CodecId {
        &self.state.codec
    }

    fn time_base(&self) -> Rational {
        self.state.time_base
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        let expected = PixelFormat::Yuyv422.frame_size(self.state.width, self.state.height);
        if Some(packet.data.len()) != expected {
            return Err(DecodeError::InvalidData(format!(
                "raw packet of {} bytes, expected {:?}",
                packet.data.len(),
                expected
            )));
        }
        self.state.accept(packet)
    }

    fn receive_frame(&mut self, frame: &mut FrameBuffer) -> Result<(), DecodeError> {
        self.state.take()?;
        frame.data.clear();
        frame.data.extend_from_slice(&self.state.pending);
        self.state.stamp(frame);
        Ok(())
    }
}

/// Motion JPEG, decoded to RGB and repacked as YUYV
pub struct MjpegDecoder {
    state: DecoderState,
}

impl Decoder for MjpegDecoder {
    fn codec(&self) -> &CodecId {
        &self.state.codec
    }

    fn time_base(&self) -> Rational {
        self.state.time_base
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        self.state.accept(packet)
    }

    fn receive_frame(&mut self, frame: &mut FrameBuffer) -> Result<(), DecodeError> {
        self.state.take()?;

        let mut decoder = JpegDecoder::new(self.state.pending.as_slice());
        let pixels = decoder
            .decode()
            .map_err(|e| DecodeError::InvalidData(e.to_string()))?;
        let info = decoder
            .info()
            .ok_or_else(|| DecodeError::InvalidData("missing JPEG header".into()))?;

        if info.width as u32 != self.state.width || info.height as u32 != self.state.height {
            return Err(DecodeError::InvalidData(format!(
                "JPEG is {}x{}, stream is {}x{}",
                info.width, info.height, self.state.width, self.state.height
            )));
        }

        let (width, height) = (info.width as usize, info.height as usize);
        match info.pixel_format {
            JpegPixelFormat::RGB24 => rgb24_to_yuyv(&pixels, width, height, &mut frame.data),
            JpegPixelFormat::L8 => gray_to_yuyv(&pixels, width, height, &mut frame.data),
            other => {
                return Err(DecodeError::InvalidData(format!(
                    "unsupported JPEG pixel format {:?}",
                    other
                )))
            }
        }

        self.state.stamp(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::MediaKind;

    fn stream(codec: CodecId, width: u32, height: u32) -> StreamInfo {
        StreamInfo {
            index: 0,
            kind: MediaKind::Video,
            codec,
            pixel_format: Some(PixelFormat::Yuyv422),
            width,
            height,
            time_base: Rational::new(1, 30),
            frame_rate: Rational::new(30, 1),
        }
    }

    fn raw_packet(len: usize, pts: i64) -> Packet {
        Packet {
            data: vec![0x80; len],
            pts: Some(pts),
            dts: Some(pts),
            duration: 1,
            stream_index: 0,
        }
    }

    #[test]
    fn unknown_codecs_have_no_decoder() {
        assert_eq!(find_decoder(&CodecId::Other("pcm_s16le".into())), None);
        assert_eq!(find_decoder(&CodecId::Mjpeg), Some(DecoderKind::Mjpeg));
    }

    #[test]
    fn open_rejects_bad_geometry() {
        assert!(DecoderKind::RawVideo
            .open(&stream(CodecId::RawVideo, 0, 4))
            .is_err());
        let mut no_format = stream(CodecId::RawVideo, 4, 4);
        no_format.pixel_format = None;
        assert!(DecoderKind::RawVideo.open(&no_format).is_err());
    }

    #[test]
    fn raw_decoder_follows_send_receive_protocol() {
        let mut decoder = DecoderKind::RawVideo
            .open(&stream(CodecId::RawVideo, 4, 2))
            .unwrap();
        assert_eq!(decoder.time_base(), Rational::new(1, 30));

        let mut frame = FrameBuffer::alloc(PixelFormat::Yuyv422, 4, 2).unwrap();
        assert!(matches!(
            decoder.receive_frame(&mut frame),
            Err(DecodeError::Again)
        ));

        decoder.send_packet(&raw_packet(16, 7)).unwrap();
        assert!(matches!(
            decoder.send_packet(&raw_packet(16, 8)),
            Err(DecodeError::Full)
        ));

        decoder.receive_frame(&mut frame).unwrap();
        assert_eq!(frame.data.len(), 16);
        assert_eq!(frame.best_effort_timestamp, Some(7));
        assert!(matches!(
            decoder.receive_frame(&mut frame),
            Err(DecodeError::Again)
        ));
    }

    #[test]
    fn raw_decoder_rejects_short_packets() {
        let mut decoder = DecoderKind::RawVideo
            .open(&stream(CodecId::RawVideo, 4, 2))
            .unwrap();
        assert!(matches!(
            decoder.send_packet(&raw_packet(10, 0)),
            Err(DecodeError::InvalidData(_))
        ));
    }

    #[test]
    fn mjpeg_decoder_reports_garbage() {
        let mut decoder = DecoderKind::Mjpeg
            .open(&stream(CodecId::Mjpeg, 4, 2))
            .unwrap();
        let mut frame = FrameBuffer::alloc(PixelFormat::Yuyv422, 4, 2).unwrap();
        decoder.send_packet(&raw_packet(32, 0)).unwrap();
        assert!(matches!(
            decoder.receive_frame(&mut frame),
            Err(DecodeError::InvalidData(_))
        ));
    }

    /// Baseline grayscale JPEG, 8x8, every sample 200
    const GRAY_JPEG: &[u8] = include_bytes!("../../tests/fixtures/gray200-8x8.jpg");

    fn jpeg_packet(pts: i64) -> Packet {
        Packet {
            data: GRAY_JPEG.to_vec(),
            pts: Some(pts),
            dts: None,
            duration: 1,
            stream_index: 0,
        }
    }

    #[test]
    fn mjpeg_decoder_repacks_gray_as_yuyv() {
        let mut decoder = DecoderKind::Mjpeg
            .open(&stream(CodecId::Mjpeg, 8, 8))
            .unwrap();
        assert_eq!(decoder.codec(), &CodecId::Mjpeg);

        let mut frame = FrameBuffer::alloc(PixelFormat::Yuyv422, 8, 8).unwrap();
        decoder.send_packet(&jpeg_packet(12)).unwrap();
        decoder.receive_frame(&mut frame).unwrap();

        assert_eq!(frame.data.len(), 8 * 8 * 2);
        assert_eq!((frame.width, frame.height), (8, 8));
        assert_eq!(frame.best_effort_timestamp, Some(12));

        let luma = crate::capture::colorspace::rgb_to_yuv(200, 200, 200).y;
        for sample in frame.data.chunks_exact(2) {
            assert!(sample[0].abs_diff(luma) <= 1, "luma {} vs {}", sample[0], luma);
            assert_eq!(sample[1], 128);
        }
    }

    #[test]
    fn mjpeg_decoder_rejects_other_dimensions() {
        let mut decoder = DecoderKind::Mjpeg
            .open(&stream(CodecId::Mjpeg, 16, 8))
            .unwrap();
        let mut frame = FrameBuffer::alloc(PixelFormat::Yuyv422, 16, 8).unwrap();
        decoder.send_packet(&jpeg_packet(0)).unwrap();
        match decoder.receive_frame(&mut frame) {
            Err(DecodeError::InvalidData(message)) => assert!(message.contains("8x8")),
            other => panic!("expected a dimension error, got {:?}", other.map(|_| ())),
        }
    }
}
