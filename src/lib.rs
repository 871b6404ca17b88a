// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A stateful bridge between an application feeding H.264 NAL units and a decoding engine.
//!
//! The [`session::DecoderSession`] accepts compressed access units one at a time, reports when a
//! complete picture is available and hands that picture to the caller in the requested
//! [`OutputFormat`], writing straight into caller-owned memory. The H.264 decoding itself and the
//! pixel format conversion are delegated to the engines described in [`engine`].

pub mod backend;
pub mod buffer;
pub mod engine;
pub mod image_processing;
pub mod nalu;
pub mod registry;
pub mod session;

use std::str::FromStr;

use enumn::N;

/// Timestamp value meaning "no presentation timestamp available" at integer-level interfaces.
pub const NO_PTS: i64 = i64::MIN;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Whether the stream geometry is still unknown.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// Pixel format requested by the caller for delivered pictures.
///
/// The integer values are part of the caller-facing interface and must not change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, N)]
#[repr(i32)]
pub enum OutputFormat {
    /// Planar 4:2:0, Y plane followed by U and V planes.
    I420 = 0,
    /// Packed 16-bit RGB, 5-6-5 bits, little-endian.
    RGB565LE = 1,
    /// Packed 32-bit native-endian word laid out as `0xAABBGGRR`.
    BGR32 = 2,
}

impl OutputFormat {
    /// Returns the internal pixel format pictures are delivered in.
    pub fn pixel_format(self) -> PixelFormat {
        match self {
            OutputFormat::I420 => PixelFormat::Yuv420p,
            OutputFormat::RGB565LE => PixelFormat::Rgb565Le,
            OutputFormat::BGR32 => PixelFormat::Bgr32,
        }
    }
}

impl TryFrom<i32> for OutputFormat {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        OutputFormat::n(value).ok_or(value)
    }
}

impl FromStr for OutputFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i420" | "I420" | "yuv420" | "YUV420" => Ok(OutputFormat::I420),
            "rgb565le" | "RGB565LE" => Ok(OutputFormat::RGB565LE),
            "bgr32" | "BGR32" => Ok(OutputFormat::BGR32),
            _ => Err("unrecognized output format. Valid values: i420, rgb565le, bgr32"),
        }
    }
}

/// Pixel formats understood by the decoding and scaling engines.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    #[default]
    Yuv420p,
    Rgb565Le,
    Bgr32,
}

impl PixelFormat {
    /// Number of planes a picture of this format is made of.
    pub fn num_planes(self) -> usize {
        match self {
            PixelFormat::Yuv420p => 3,
            PixelFormat::Rgb565Le | PixelFormat::Bgr32 => 1,
        }
    }

    /// Bytes per pixel for packed formats, `None` for planar ones.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Yuv420p => None,
            PixelFormat::Rgb565Le => Some(2),
            PixelFormat::Bgr32 => Some(4),
        }
    }

    /// Returns the unpadded line size, in bytes, of `plane` for a picture `width` pixels wide.
    pub fn plane_width(self, plane: usize, width: usize) -> usize {
        match (self, plane) {
            (PixelFormat::Yuv420p, 0) => width,
            (PixelFormat::Yuv420p, 1 | 2) => (width + 1) / 2,
            (PixelFormat::Rgb565Le, 0) => width * 2,
            (PixelFormat::Bgr32, 0) => width * 4,
            _ => 0,
        }
    }

    /// Returns the number of lines of `plane` for a picture `height` pixels tall.
    pub fn plane_height(self, plane: usize, height: usize) -> usize {
        match (self, plane) {
            (PixelFormat::Yuv420p, 0) => height,
            (PixelFormat::Yuv420p, 1 | 2) => (height + 1) / 2,
            (PixelFormat::Rgb565Le | PixelFormat::Bgr32, 0) => height,
            _ => 0,
        }
    }
}

/// Returns the size required to store a picture of `format` with size `width`x`height`, without
/// any padding. This is the minimum size of an output buffer for a delivery.
pub fn decoded_frame_size(format: PixelFormat, width: usize, height: usize) -> usize {
    match format {
        PixelFormat::Yuv420p => {
            let y_size = width * height;
            // U and V planes need to be aligned to 2.
            let uv_size = ((width + 1) / 2) * ((height + 1) / 2) * 2;

            y_size + uv_size
        }
        PixelFormat::Rgb565Le | PixelFormat::Bgr32 => {
            // Both packed formats have a bytes-per-pixel value.
            width * height * format.bytes_per_pixel().unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i420_size_rounds_chroma_up() {
        assert_eq!(decoded_frame_size(PixelFormat::Yuv420p, 320, 200), 320 * 200 * 3 / 2);
        assert_eq!(decoded_frame_size(PixelFormat::Yuv420p, 1, 1), 3);
        assert_eq!(decoded_frame_size(PixelFormat::Yuv420p, 5, 3), 15 + 2 * 3 * 2);

        for (width, height) in [(2, 2), (7, 9), (176, 144), (1919, 1081)] {
            let chroma = ((width + 1) / 2) * ((height + 1) / 2);
            assert_eq!(
                decoded_frame_size(PixelFormat::Yuv420p, width, height),
                width * height + 2 * chroma,
                "{}x{}",
                width,
                height
            );
        }
    }

    #[test]
    fn packed_sizes() {
        assert_eq!(decoded_frame_size(PixelFormat::Rgb565Le, 5, 3), 30);
        assert_eq!(decoded_frame_size(PixelFormat::Bgr32, 5, 3), 60);
        assert_eq!(decoded_frame_size(PixelFormat::Bgr32, 0, 0), 0);
    }

    #[test]
    fn output_format_integer_mapping() {
        assert_eq!(OutputFormat::try_from(0), Ok(OutputFormat::I420));
        assert_eq!(OutputFormat::try_from(1), Ok(OutputFormat::RGB565LE));
        assert_eq!(OutputFormat::try_from(2), Ok(OutputFormat::BGR32));
        assert_eq!(OutputFormat::try_from(3), Err(3));
        assert_eq!(OutputFormat::try_from(-1), Err(-1));

        assert_eq!(OutputFormat::I420.pixel_format(), PixelFormat::Yuv420p);
        assert_eq!(OutputFormat::RGB565LE.pixel_format(), PixelFormat::Rgb565Le);
        assert_eq!(OutputFormat::BGR32.pixel_format(), PixelFormat::Bgr32);
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("i420".parse::<OutputFormat>(), Ok(OutputFormat::I420));
        assert_eq!("RGB565LE".parse::<OutputFormat>(), Ok(OutputFormat::RGB565LE));
        assert_eq!("bgr32".parse::<OutputFormat>(), Ok(OutputFormat::BGR32));
        assert!("nv12".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn plane_geometry() {
        let format = PixelFormat::Yuv420p;
        assert_eq!(format.num_planes(), 3);
        assert_eq!(format.plane_width(1, 7), 4);
        assert_eq!(format.plane_height(2, 9), 5);
        assert_eq!(PixelFormat::Bgr32.plane_width(0, 7), 28);
        assert_eq!(PixelFormat::Bgr32.plane_height(1, 7), 0);
    }
}
