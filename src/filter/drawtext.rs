//! `drawtext` overlay for packed 4:2:2 frames
//!
//! Supported options: `x`, `y`, `fontsize`, `fontcolor`, `shadowcolor`,
//! `shadowx`, `shadowy`, `text` and `fontfile`. The text is a template
//! expanded for every frame:
//!
//! - `%{localtime}` / `%{localtime:FMT}` local wall clock, strftime format
//! - `%{gmtime}` / `%{gmtime:FMT}` same in UTC
//! - `%{pts}` frame timestamp in seconds
//! - `%{n}` number of frames filtered so far
//!
//! With `fontfile` the text is rasterized from that TrueType/OpenType font
//! with anti-aliased coverage. Without it the built-in 5x7 bitmap font is
//! scaled up by whole pixels.

use std::fmt::Write;

use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};
use tracing::{debug, info};

use super::font::{self, ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH, LINE_HEIGHT};
use super::parse::FilterOption;
use super::{FilterError, SourceParams, VideoFilter};
use crate::capture::colorspace::{rgb_to_yuv, Yuv};
use crate::capture::frame::{FrameBuffer, PixelFormat};

const NAME: &str = "drawtext";
const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Largest accepted `fontsize` in pixels
pub const MAX_FONTSIZE: u32 = 4096;

/// Colour with opacity, 255 is opaque
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub yuv: Yuv,
    pub alpha: u8,
}

impl Color {
    pub const BLACK: Color = Color {
        yuv: Yuv::BLACK,
        alpha: 255,
    };

    /// `name`, `0xRRGGBB[AA]` or `#RRGGBB[AA]`, each optionally followed by `@alpha` (0.0-1.0)
    pub fn parse(spec: &str) -> Option<Self> {
        let (base, alpha) = match spec.split_once('@') {
            Some((base, alpha)) => {
                let alpha: f32 = alpha.parse().ok()?;
                if !(0.0..=1.0).contains(&alpha) {
                    return None;
                }
                (base, Some((alpha * 255.0).round() as u8))
            }
            None => (spec, None),
        };

        let (rgb, hex_alpha) = match base.to_ascii_lowercase().as_str() {
            "white" => ((255, 255, 255), None),
            "black" => ((0, 0, 0), None),
            "red" => ((255, 0, 0), None),
            "green" => ((0, 128, 0), None),
            "lime" => ((0, 255, 0), None),
            "blue" => ((0, 0, 255), None),
            "yellow" => ((255, 255, 0), None),
            "cyan" => ((0, 255, 255), None),
            "magenta" => ((255, 0, 255), None),
            "orange" => ((255, 165, 0), None),
            "gray" | "grey" => ((128, 128, 128), None),
            hex => parse_hex(hex)?,
        };

        Some(Self {
            yuv: rgb_to_yuv(rgb.0, rgb.1, rgb.2),
            alpha: alpha.or(hex_alpha).unwrap_or(255),
        })
    }
}

fn parse_hex(hex: &str) -> Option<((u8, u8, u8), Option<u8>)> {
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix('#'))?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    match digits.len() {
        6 => Some(((byte(0)?, byte(2)?, byte(4)?), None)),
        8 => Some(((byte(0)?, byte(2)?, byte(4)?), Some(byte(6)?))),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    LocalTime(String),
    GmTime(String),
    Pts,
    FrameNumber,
}

/// Text with `%{...}` expansions, validated once at parse time
#[derive(Debug, Clone, PartialEq)]
pub struct TextTemplate {
    segments: Vec<Segment>,
}

impl TextTemplate {
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(start) = rest.find("%{") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| format!("unterminated expansion in {text:?}"))?;
            let body = &after[..end];
            let (function, arg) = match body.split_once(':') {
                Some((function, arg)) => (function.trim(), Some(arg)),
                None => (body.trim(), None),
            };

            let segment = match function {
                "localtime" => Segment::LocalTime(time_format(arg)?),
                "gmtime" => Segment::GmTime(time_format(arg)?),
                "pts" => Segment::Pts,
                "n" | "frame_num" => Segment::FrameNumber,
                other => return Err(format!("unknown expansion function {other:?}")),
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
            rest = &after[end + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Whether the template has no per-frame expansions
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn expand(&self, now: &DateTime<Local>, frame: &FrameBuffer, frame_number: u64, out: &mut String) {
        for segment in &self.segments {
            // Formats were validated in parse, a write error only drops this segment
            let _ = match segment {
                Segment::Literal(text) => out.write_str(text),
                Segment::LocalTime(format) => write!(out, "{}", now.format(format)),
                Segment::GmTime(format) => {
                    write!(out, "{}", now.with_timezone(&Utc).format(format))
                }
                Segment::Pts => match frame.pts {
                    Some(pts) => write!(out, "{:.3}", frame.time_base.seconds(pts)),
                    None => out.write_str("NOPTS"),
                },
                Segment::FrameNumber => write!(out, "{}", frame_number),
            };
        }
    }
}

fn time_format(arg: Option<&str>) -> Result<String, String> {
    let format = arg.unwrap_or(DEFAULT_TIME_FORMAT);
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid time format {format:?}"));
    }
    Ok(format.to_string())
}

/// Text overlay drawn directly into YUYV frames
pub struct DrawText {
    x: i32,
    y: i32,
    fontsize: u32,
    fontcolor: Color,
    shadowcolor: Color,
    shadowx: i32,
    shadowy: i32,
    template: TextTemplate,
    font: Option<FontVec>,
    frame_number: u64,
    text: String,
}

impl DrawText {
    pub fn from_options(options: &[FilterOption]) -> Result<Self, FilterError> {
        let mut filter = Self {
            x: 0,
            y: 0,
            fontsize: 16,
            fontcolor: Color::BLACK,
            shadowcolor: Color::BLACK,
            shadowx: 0,
            shadowy: 0,
            template: TextTemplate { segments: Vec::new() },
            font: None,
            frame_number: 0,
            text: String::new(),
        };
        let mut has_text = false;

        for option in options {
            let key = option.key.as_deref().ok_or_else(|| FilterError::UnknownOption {
                filter: NAME.into(),
                option: option.value.clone(),
            })?;
            let value = option.value.as_str();
            let invalid = || FilterError::InvalidValue {
                filter: NAME.into(),
                option: key.into(),
                value: value.into(),
            };

            match key {
                "x" => filter.x = value.parse().map_err(|_| invalid())?,
                "y" => filter.y = value.parse().map_err(|_| invalid())?,
                "fontsize" => {
                    filter.fontsize = value.parse().map_err(|_| invalid())?;
                    if filter.fontsize == 0 || filter.fontsize > MAX_FONTSIZE {
                        return Err(invalid());
                    }
                }
                "fontcolor" => filter.fontcolor = Color::parse(value).ok_or_else(invalid)?,
                "shadowcolor" => filter.shadowcolor = Color::parse(value).ok_or_else(invalid)?,
                "shadowx" => filter.shadowx = value.parse().map_err(|_| invalid())?,
                "shadowy" => filter.shadowy = value.parse().map_err(|_| invalid())?,
                "text" => {
                    filter.template = TextTemplate::parse(value).map_err(|_| invalid())?;
                    has_text = true;
                }
                "fontfile" => filter.font = Some(load_font(value).ok_or_else(invalid)?),
                other => {
                    return Err(FilterError::UnknownOption {
                        filter: NAME.into(),
                        option: other.into(),
                    })
                }
            }
        }

        if !has_text {
            return Err(FilterError::MissingOption {
                filter: NAME.into(),
                option: "text",
            });
        }
        Ok(filter)
    }

    fn scale(&self) -> i32 {
        (self.fontsize / 8).max(1) as i32
    }

    fn draw(&self, frame: &mut FrameBuffer, text: &str, x0: i32, y0: i32, color: Color) {
        match &self.font {
            Some(font) => draw_outlined(font, self.fontsize, frame, text, x0, y0, color),
            None => self.draw_bitmap(frame, text, x0, y0, color),
        }
    }

    fn draw_bitmap(&self, frame: &mut FrameBuffer, text: &str, x0: i32, y0: i32, color: Color) {
        let scale = self.scale();
        let (mut pen_x, mut pen_y) = (x0, y0);

        for c in text.chars() {
            if c == '\n' {
                pen_x = x0;
                pen_y = pen_y.saturating_add(LINE_HEIGHT * scale);
                continue;
            }
            let rows = font::glyph(c);
            for (row, bits) in (0..GLYPH_HEIGHT).zip(rows) {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1u8 << (GLYPH_WIDTH - 1 - col)) != 0 {
                        fill_block(
                            frame,
                            pen_x.saturating_add(col * scale),
                            pen_y.saturating_add(row * scale),
                            scale,
                            color,
                        );
                    }
                }
            }
            pen_x = pen_x.saturating_add(ADVANCE * scale);
        }
    }
}

fn load_font(path: &str) -> Option<FontVec> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Cannot read fontfile {}: {}", path, e);
            return None;
        }
    };
    match FontVec::try_from_vec(bytes) {
        Ok(font) => {
            info!("Loaded fontfile {} ({} glyphs)", path, font.glyph_count());
            Some(font)
        }
        Err(e) => {
            debug!("Cannot parse fontfile {}: {}", path, e);
            None
        }
    }
}

/// Rasterize `text` with its top-left corner at (x0, y0), blending each
/// pixel by glyph coverage
fn draw_outlined(
    font: &FontVec,
    fontsize: u32,
    frame: &mut FrameBuffer,
    text: &str,
    x0: i32,
    y0: i32,
    color: Color,
) {
    let scaled = font.as_scaled(PxScale::from(fontsize as f32));
    let line_height = scaled.height() + scaled.line_gap();
    let (width, height) = (frame.width as f32, frame.height as f32);
    let mut caret = point(x0 as f32, y0 as f32 + scaled.ascent());

    for c in text.chars() {
        if c == '\n' {
            caret = point(x0 as f32, caret.y + line_height);
            continue;
        }
        let mut glyph = scaled.scaled_glyph(c);
        glyph.position = caret;
        caret.x += scaled.h_advance(glyph.id);

        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        if bounds.max.x <= 0.0 || bounds.max.y <= 0.0 || bounds.min.x >= width || bounds.min.y >= height {
            continue;
        }
        let (left, top) = (bounds.min.x as i32, bounds.min.y as i32);
        outlined.draw(|gx, gy, coverage| {
            let alpha = (coverage.clamp(0.0, 1.0) * color.alpha as f32).round() as u8;
            if alpha > 0 {
                blend_pixel(
                    frame,
                    left.saturating_add(gx as i32),
                    top.saturating_add(gy as i32),
                    color,
                    alpha,
                );
            }
        });
    }
}

impl VideoFilter for DrawText {
    fn name(&self) -> &'static str {
        NAME
    }

    fn config(&mut self, input: &SourceParams) -> Result<(), FilterError> {
        if input.pixel_format != PixelFormat::Yuyv422 {
            return Err(FilterError::FormatNotAccepted(input.pixel_format));
        }
        if input.width % 2 != 0 {
            return Err(FilterError::InvalidSource(format!(
                "{NAME} needs an even width, got {}",
                input.width
            )));
        }
        Ok(())
    }

    fn filter(&mut self, frame: &mut FrameBuffer) -> Result<(), FilterError> {
        let mut text = std::mem::take(&mut self.text);
        text.clear();
        self.template
            .expand(&Local::now(), frame, self.frame_number, &mut text);

        if self.shadowx != 0 || self.shadowy != 0 {
            self.draw(
                frame,
                &text,
                self.x.saturating_add(self.shadowx),
                self.y.saturating_add(self.shadowy),
                self.shadowcolor,
            );
        }
        self.draw(frame, &text, self.x, self.y, self.fontcolor);

        self.text = text;
        self.frame_number += 1;
        Ok(())
    }
}

fn blend(src: u8, dst: u8, alpha: u8) -> u8 {
    ((src as u32 * alpha as u32 + dst as u32 * (255 - alpha as u32) + 127) / 255) as u8
}

/// Frames we can write into: complete, with whole pixel pairs
fn drawable(frame: &FrameBuffer) -> bool {
    frame.width % 2 == 0 && frame.data.len() >= frame.expected_len()
}

fn blend_sample(data: &mut [u8], line: usize, px: usize, color: Color, alpha: u8) {
    let luma = line + px * 2;
    // Each horizontal pair shares U at +1 and V at +3
    let pair = line + (px & !1) * 2;
    data[luma] = blend(color.yuv.y, data[luma], alpha);
    data[pair + 1] = blend(color.yuv.u, data[pair + 1], alpha);
    data[pair + 3] = blend(color.yuv.v, data[pair + 3], alpha);
}

fn blend_pixel(frame: &mut FrameBuffer, x: i32, y: i32, color: Color, alpha: u8) {
    if x < 0 || y < 0 || x as u32 >= frame.width || y as u32 >= frame.height || !drawable(frame) {
        return;
    }
    let line = y as usize * frame.stride();
    blend_sample(&mut frame.data, line, x as usize, color, alpha);
}

fn fill_block(frame: &mut FrameBuffer, x: i32, y: i32, size: i32, color: Color) {
    if !drawable(frame) {
        return;
    }
    let (width, height) = (frame.width as i32, frame.height as i32);
    let stride = frame.stride();

    for py in y.max(0)..y.saturating_add(size).min(height) {
        let line = py as usize * stride;
        for px in x.max(0)..x.saturating_add(size).min(width) {
            blend_sample(&mut frame.data, line, px as usize, color, color.alpha);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::capture::colorspace::fill_black;
    use crate::capture::frame::Rational;
    use crate::filter::parse::{parse_chain, quote};

    fn drawtext(desc: &str) -> Result<DrawText, FilterError> {
        let chain = parse_chain(desc).unwrap();
        DrawText::from_options(&chain[0].options)
    }

    fn black_frame(width: u32, height: u32) -> FrameBuffer {
        let mut frame = FrameBuffer::alloc(PixelFormat::Yuyv422, width, height).unwrap();
        frame.data.resize(frame.expected_len(), 0);
        fill_black(&mut frame.data);
        frame.time_base = Rational::new(1, 30);
        frame
    }

    #[test]
    fn colors_parse_names_hex_and_alpha() {
        assert_eq!(Color::parse("white").unwrap().yuv.y, 235);
        assert_eq!(Color::parse("0x000000").unwrap().yuv, Yuv::BLACK);
        assert_eq!(Color::parse("#FFFFFF80").unwrap().alpha, 0x80);
        assert_eq!(Color::parse("white@0.5").unwrap().alpha, 128);
        assert!(Color::parse("white@2").is_none());
        assert!(Color::parse("chartreuse-ish").is_none());
    }

    #[test]
    fn template_expands_time_and_counters() {
        let template =
            TextTemplate::parse("%{localtime:%Y-%m-%d} Mon %{localtime:%H:%M:%S} #%{n}").unwrap();
        assert!(!template.is_static());
        let now = Local.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap();
        let mut out = String::new();
        template.expand(&now, &black_frame(2, 2), 41, &mut out);
        assert_eq!(out, "2024-03-04 Mon 05:06:07 #41");
    }

    #[test]
    fn template_rejects_unknown_functions_and_formats() {
        assert!(TextTemplate::parse("%{weather}").is_err());
        assert!(TextTemplate::parse("%{localtime").is_err());
        assert!(TextTemplate::parse("%{localtime:%Q}").is_err());
        assert!(TextTemplate::parse("100% static").unwrap().is_static());
    }

    #[test]
    fn options_are_validated() {
        assert!(drawtext("drawtext=text=hi:x=5:y=5:fontsize=24").is_ok());
        assert!(matches!(
            drawtext("drawtext=x=5"),
            Err(FilterError::MissingOption { .. })
        ));
        assert!(matches!(
            drawtext("drawtext=text=hi:x=five"),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            drawtext("drawtext=text=hi:box=1"),
            Err(FilterError::UnknownOption { .. })
        ));
        assert!(matches!(
            drawtext("drawtext=text=hi:fontsize=0"),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            drawtext("drawtext=text=hi:fontsize=100000"),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            drawtext("drawtext=text=hi:fontfile=/nonexistent/font.ttf"),
            Err(FilterError::InvalidValue { .. })
        ));
    }

    #[test]
    fn draws_text_and_shadow_inside_region_only() {
        let mut filter =
            drawtext("drawtext=text=88:x=2:y=2:fontsize=8:fontcolor=white:shadowcolor=red:shadowx=1:shadowy=1")
                .unwrap();
        let mut frame = black_frame(32, 16);
        let untouched = frame.data.clone();
        filter.filter(&mut frame).unwrap();

        // Top-left pixel of the first '8' glyph row is off, second column is on
        let lit = 2 * frame.stride() + 3 * 2;
        assert_eq!(frame.data[lit], 235);

        // Bottom rows are below glyph + shadow
        let last_row = 15 * frame.stride();
        assert_eq!(frame.data[last_row..], untouched[last_row..]);
        assert_ne!(frame.data, untouched);
    }

    #[test]
    fn drawing_off_frame_is_clipped() {
        let mut filter = drawtext("drawtext=text=WWWW:x=-3:y=10:fontsize=24").unwrap();
        let mut frame = black_frame(8, 12);
        filter.filter(&mut frame).unwrap();
        assert_eq!(frame.data.len(), 8 * 12 * 2);
    }

    #[test]
    fn positions_near_the_integer_limits_do_not_overflow() {
        let mut frame = black_frame(16, 16);
        let untouched = frame.data.clone();

        let far = format!(
            "drawtext=text=WW\nWW:x={}:y={}:fontsize={}:shadowx={}:shadowy=5",
            i32::MAX - 10,
            i32::MAX - 10,
            MAX_FONTSIZE,
            i32::MAX
        );
        drawtext(&far).unwrap().filter(&mut frame).unwrap();

        let before = format!(
            "drawtext=text=WW:x={}:y={}:shadowx={}:shadowy={}",
            i32::MIN + 1,
            i32::MIN + 1,
            i32::MIN,
            i32::MIN
        );
        drawtext(&before).unwrap().filter(&mut frame).unwrap();
        assert_eq!(frame.data, untouched);
    }

    fn hanzi_font() -> String {
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/hanzi-box.ttf").to_string()
    }

    #[test]
    fn fontfile_glyphs_are_rasterized() {
        let desc = format!(
            "drawtext=fontfile={}:text='星':fontsize=16:fontcolor=white",
            quote(&hanzi_font())
        );
        let mut filter = drawtext(&desc).unwrap();
        let mut frame = black_frame(32, 32);
        filter.filter(&mut frame).unwrap();

        // The outline is a solid square covering roughly (1.6, 1.6)-(14.4, 14.4)
        let luma = |frame: &FrameBuffer, x: usize, y: usize| frame.data[y * frame.stride() + x * 2];
        assert_eq!(luma(&frame, 5, 7), 235);
        assert_eq!(luma(&frame, 8, 8), 235);
        assert_eq!(luma(&frame, 0, 0), 16);
        assert_eq!(luma(&frame, 20, 20), 16);

        // The bitmap fallback draws a hollow box for the same character
        let mut bitmap = drawtext("drawtext=text='星':fontsize=16:fontcolor=white").unwrap();
        let mut fallback = black_frame(32, 32);
        bitmap.filter(&mut fallback).unwrap();
        assert_eq!(luma(&fallback, 5, 7), 16);
        assert_ne!(fallback.data, frame.data);
    }

    #[test]
    fn characters_missing_from_the_fontfile_draw_nothing() {
        let desc = format!(
            "drawtext=fontfile={}:text=A:fontsize=16:fontcolor=white",
            quote(&hanzi_font())
        );
        let mut frame = black_frame(32, 32);
        let untouched = frame.data.clone();
        drawtext(&desc).unwrap().filter(&mut frame).unwrap();
        assert_eq!(frame.data, untouched);
    }
}
