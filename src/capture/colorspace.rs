//! BT.601 limited-range conversions into packed 4:2:2

/// Luma/chroma triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Yuv {
    pub y: u8,
    pub u: u8,
    pub v: u8,
}

impl Yuv {
    pub const BLACK: Yuv = Yuv { y: 16, u: 128, v: 128 };
}

pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> Yuv {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    Yuv {
        y: y.clamp(0, 255) as u8,
        u: u.clamp(0, 255) as u8,
        v: v.clamp(0, 255) as u8,
    }
}

/// Convert tightly packed RGB24 into YUYV, averaging chroma over each pixel pair
pub fn rgb24_to_yuyv(rgb: &[u8], width: usize, height: usize, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(width * height * 2);
    for row in rgb.chunks_exact(width * 3).take(height) {
        for pair in row.chunks(6) {
            let a = rgb_to_yuv(pair[0], pair[1], pair[2]);
            let b = if pair.len() == 6 {
                rgb_to_yuv(pair[3], pair[4], pair[5])
            } else {
                a
            };
            let u = ((a.u as u16 + b.u as u16) / 2) as u8;
            let v = ((a.v as u16 + b.v as u16) / 2) as u8;
            out.extend_from_slice(&[a.y, u, b.y, v]);
        }
    }
}

/// Grayscale into YUYV with neutral chroma
pub fn gray_to_yuyv(gray: &[u8], width: usize, height: usize, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(width * height * 2);
    for row in gray.chunks_exact(width).take(height) {
        for &l in row {
            out.push(rgb_to_yuv(l, l, l).y);
            out.push(128);
        }
    }
}

/// Paint a YUYV buffer black
pub fn fill_black(out: &mut [u8]) {
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = if i % 2 == 0 { Yuv::BLACK.y } else { 128 };
    }
}
