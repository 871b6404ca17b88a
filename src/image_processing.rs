// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pixel copy and color conversion routines operating on strided I420 input.

use byteorder::ByteOrder;
use byteorder::LittleEndian;

/// Copies `src` into `dst` as I420, removing any padding.
///
/// `strides` and `offsets` give the stride and starting position of each plane in `src`. In `dst`
/// the Y, U and V planes are put one after the other without padding, so `dst` must be at least
/// `decoded_frame_size(PixelFormat::Yuv420p, width, height)` bytes long.
pub fn i420_copy(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    strides: [usize; 3],
    offsets: [usize; 3],
) {
    // Align width and height of UV planes to 2.
    let uv_width = (width + 1) / 2;
    let uv_height = (height + 1) / 2;

    let dst_y_size = width * height;
    let dst_u_size = uv_width * uv_height;
    let (dst_y_plane, dst_uv_planes) = dst.split_at_mut(dst_y_size);
    let (dst_u_plane, dst_v_plane) = dst_uv_planes.split_at_mut(dst_u_size);

    copy_plane(&src[offsets[0]..], strides[0], dst_y_plane, width, height);
    copy_plane(&src[offsets[1]..], strides[1], dst_u_plane, uv_width, uv_height);
    copy_plane(&src[offsets[2]..], strides[2], dst_v_plane, uv_width, uv_height);
}

fn copy_plane(src: &[u8], stride: usize, dst: &mut [u8], width: usize, height: usize) {
    if width == 0 {
        return;
    }

    let src_lines = src.chunks(stride).map(|line| &line[..width]);
    let dst_lines = dst.chunks_mut(width);
    for (src_line, dst_line) in src_lines.zip(dst_lines).take(height) {
        dst_line.copy_from_slice(src_line);
    }
}

/// How chroma samples are picked for each output pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaSampling {
    /// Use the chroma sample covering the pixel.
    Nearest,
    /// Average the chroma samples around the pixel.
    Interpolated,
}

/// Converts one BT.601 limited range YUV sample to RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let clip = |value: i32| (value >> 8).clamp(0, 255) as u8;

    (
        clip(298 * c + 409 * e + 128),
        clip(298 * c - 100 * d - 208 * e + 128),
        clip(298 * c + 516 * d + 128),
    )
}

/// Reads the chroma value at pixel (`x`, `y`) from a plane of `plane_width`x`plane_height`
/// samples.
fn chroma_at(
    plane: &[u8],
    stride: usize,
    (plane_width, plane_height): (usize, usize),
    (x, y): (usize, usize),
    sampling: ChromaSampling,
) -> u8 {
    let cx = x / 2;
    let cy = y / 2;

    match sampling {
        ChromaSampling::Nearest => plane[cy * stride + cx],
        ChromaSampling::Interpolated => {
            let cx1 = if x % 2 == 1 { (cx + 1).min(plane_width - 1) } else { cx };
            let cy1 = if y % 2 == 1 { (cy + 1).min(plane_height - 1) } else { cy };

            let sum = u32::from(plane[cy * stride + cx])
                + u32::from(plane[cy * stride + cx1])
                + u32::from(plane[cy1 * stride + cx])
                + u32::from(plane[cy1 * stride + cx1]);

            ((sum + 2) / 4) as u8
        }
    }
}

/// Converts strided I420 `src` into a packed RGB `dst`, calling `write_pixel` with the
/// `bytes_per_pixel` bytes of each destination pixel.
#[allow(clippy::too_many_arguments)]
fn i420_to_packed<F>(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    strides: [usize; 3],
    offsets: [usize; 3],
    sampling: ChromaSampling,
    bytes_per_pixel: usize,
    write_pixel: F,
) where
    F: Fn(&mut [u8], (u8, u8, u8)),
{
    if width == 0 || height == 0 {
        return;
    }

    let uv_dims = ((width + 1) / 2, (height + 1) / 2);
    let src_y = &src[offsets[0]..];
    let src_u = &src[offsets[1]..];
    let src_v = &src[offsets[2]..];

    for (y, dst_line) in dst
        .chunks_mut(width * bytes_per_pixel)
        .take(height)
        .enumerate()
    {
        let luma_line = &src_y[y * strides[0]..][..width];

        for (x, (pixel, &luma)) in dst_line
            .chunks_mut(bytes_per_pixel)
            .zip(luma_line)
            .enumerate()
        {
            let u = chroma_at(src_u, strides[1], uv_dims, (x, y), sampling);
            let v = chroma_at(src_v, strides[2], uv_dims, (x, y), sampling);

            write_pixel(pixel, yuv_to_rgb(luma, u, v));
        }
    }
}

/// Converts strided I420 `src` into packed little-endian RGB565 in `dst`.
///
/// `dst` must be at least `width * height * 2` bytes long.
pub fn i420_to_rgb565le(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    strides: [usize; 3],
    offsets: [usize; 3],
    sampling: ChromaSampling,
) {
    i420_to_packed(
        src,
        dst,
        width,
        height,
        strides,
        offsets,
        sampling,
        2,
        |pixel, (r, g, b)| {
            let value =
                (u16::from(r) >> 3) << 11 | (u16::from(g) >> 2) << 5 | u16::from(b) >> 3;
            LittleEndian::write_u16(pixel, value);
        },
    );
}

/// Converts strided I420 `src` into 32-bit `0xAABBGGRR` words in `dst`, with opaque alpha.
///
/// `dst` must be at least `width * height * 4` bytes long.
pub fn i420_to_bgr32(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    strides: [usize; 3],
    offsets: [usize; 3],
    sampling: ChromaSampling,
) {
    i420_to_packed(
        src,
        dst,
        width,
        height,
        strides,
        offsets,
        sampling,
        4,
        |pixel, (r, g, b)| {
            let value = 0xff00_0000 | u32::from(b) << 16 | u32::from(g) << 8 | u32::from(r);
            LittleEndian::write_u32(pixel, value);
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a 4x2 I420 picture with padded lines, returning the data, strides and offsets.
    fn padded_i420(y: [u8; 8], u: [u8; 2], v: [u8; 2]) -> (Vec<u8>, [usize; 3], [usize; 3]) {
        let strides = [6, 3, 3];
        let mut data = vec![0xee; 6 * 2 + 3 + 3];
        data[0..4].copy_from_slice(&y[0..4]);
        data[6..10].copy_from_slice(&y[4..8]);
        data[12..14].copy_from_slice(&u);
        data[15..17].copy_from_slice(&v);

        (data, strides, [0, 12, 15])
    }

    #[test]
    fn i420_copy_strips_padding() {
        let (src, strides, offsets) =
            padded_i420([1, 2, 3, 4, 5, 6, 7, 8], [10, 11], [20, 21]);
        let mut dst = vec![0u8; 12];

        i420_copy(&src, &mut dst, 4, 2, strides, offsets);

        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 20, 21]);
    }

    #[test]
    fn i420_copy_odd_geometry() {
        // 3x3 picture: chroma planes are 2x2.
        let src: Vec<u8> = (0..9).chain(100..104).chain(200..204).collect();
        let mut dst = vec![0u8; 17];

        i420_copy(&src, &mut dst, 3, 3, [3, 2, 2], [0, 9, 13]);

        assert_eq!(dst, src);
    }

    #[test]
    fn limited_range_extremes() {
        assert_eq!(yuv_to_rgb(16, 128, 128), (0, 0, 0));
        assert_eq!(yuv_to_rgb(235, 128, 128), (255, 255, 255));
        assert_eq!(yuv_to_rgb(0, 128, 128), (0, 0, 0));
        assert_eq!(yuv_to_rgb(255, 128, 128), (255, 255, 255));
    }

    #[test]
    fn bgr32_byte_order() {
        // Pure red in BT.601 limited range.
        let (src, strides, offsets) = padded_i420([81; 8], [90; 2], [240; 2]);
        let mut dst = vec![0u8; 4 * 2 * 4];

        i420_to_bgr32(&src, &mut dst, 4, 2, strides, offsets, ChromaSampling::Nearest);

        for pixel in dst.chunks(4) {
            assert!(pixel[0] > 240, "red {:?}", pixel);
            assert!(pixel[1] < 16, "green {:?}", pixel);
            assert!(pixel[2] < 16, "blue {:?}", pixel);
            assert_eq!(pixel[3], 0xff);
        }
    }

    #[test]
    fn rgb565_packing() {
        let (src, strides, offsets) = padded_i420([235; 8], [128; 2], [128; 2]);
        let mut dst = vec![0u8; 4 * 2 * 2];

        i420_to_rgb565le(&src, &mut dst, 4, 2, strides, offsets, ChromaSampling::Nearest);

        assert!(dst.chunks(2).all(|pixel| pixel == [0xff, 0xff]));

        let (src, strides, offsets) = padded_i420([16; 8], [128; 2], [128; 2]);
        i420_to_rgb565le(&src, &mut dst, 4, 2, strides, offsets, ChromaSampling::Nearest);

        assert!(dst.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn interpolated_chroma_averages_neighbours() {
        let plane = [0u8, 100, 200, 50];

        assert_eq!(chroma_at(&plane, 2, (2, 2), (0, 0), ChromaSampling::Interpolated), 0);
        assert_eq!(chroma_at(&plane, 2, (2, 2), (1, 0), ChromaSampling::Interpolated), 50);
        assert_eq!(chroma_at(&plane, 2, (2, 2), (1, 1), ChromaSampling::Interpolated), 88);
        assert_eq!(chroma_at(&plane, 2, (2, 2), (3, 3), ChromaSampling::Interpolated), 50);
        assert_eq!(chroma_at(&plane, 2, (2, 2), (1, 1), ChromaSampling::Nearest), 0);
    }
}
