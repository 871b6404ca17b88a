// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A CPU scaling engine converting decoded I420 pictures to packed RGB formats.

use anyhow::anyhow;

use crate::engine::ConverterParams;
use crate::engine::EngineError;
use crate::engine::EngineResult;
use crate::engine::FrameDescriptor;
use crate::engine::Picture;
use crate::engine::ScaleFilter;
use crate::engine::Scaler;
use crate::engine::ScalerFactory;
use crate::image_processing::i420_to_bgr32;
use crate::image_processing::i420_to_rgb565le;
use crate::image_processing::ChromaSampling;
use crate::PixelFormat;

#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareScalerFactory;

impl ScalerFactory for SoftwareScalerFactory {
    type Scaler = SoftwareScaler;

    fn create(&self, params: &ConverterParams) -> EngineResult<SoftwareScaler> {
        SoftwareScaler::new(*params)
    }
}

/// Converts I420 pictures of a fixed geometry to RGB565LE or BGR32.
#[derive(Debug)]
pub struct SoftwareScaler {
    params: ConverterParams,
    sampling: ChromaSampling,
}

impl SoftwareScaler {
    pub fn new(params: ConverterParams) -> EngineResult<Self> {
        match (params.src_format, params.dst_format) {
            (PixelFormat::Yuv420p, PixelFormat::Rgb565Le | PixelFormat::Bgr32) => (),
            (src, dst) => return Err(EngineError::UnsupportedConversion(src, dst)),
        }

        if params.resolution.is_empty() {
            return Err(anyhow!("cannot convert pictures of empty geometry").into());
        }

        let sampling = match params.filter {
            ScaleFilter::FastBilinear => ChromaSampling::Nearest,
            ScaleFilter::Bilinear => ChromaSampling::Interpolated,
        };

        Ok(Self { params, sampling })
    }

    pub fn params(&self) -> &ConverterParams {
        &self.params
    }
}

impl Scaler for SoftwareScaler {
    fn scale(&mut self, src: &Picture, dst: &mut FrameDescriptor) -> EngineResult<()> {
        let params = &self.params;

        if src.format() != params.src_format || src.resolution() != params.resolution {
            return Err(anyhow!(
                "source picture {:?} {:?} does not match converter {:?}",
                src.format(),
                src.resolution(),
                params
            )
            .into());
        }

        if dst.format() != params.dst_format || dst.resolution() != params.resolution {
            return Err(anyhow!(
                "destination {:?} {:?} does not match converter {:?}",
                dst.format(),
                dst.resolution(),
                params
            )
            .into());
        }

        let width = params.resolution.width as usize;
        let height = params.resolution.height as usize;
        let strides = src.strides();
        let offsets = src.offsets();

        match params.dst_format {
            PixelFormat::Rgb565Le => i420_to_rgb565le(
                src.data(),
                dst.data_mut(),
                width,
                height,
                strides,
                offsets,
                self.sampling,
            ),
            PixelFormat::Bgr32 => i420_to_bgr32(
                src.data(),
                dst.data_mut(),
                width,
                height,
                strides,
                offsets,
                self.sampling,
            ),
            PixelFormat::Yuv420p => {
                return Err(EngineError::UnsupportedConversion(
                    params.src_format,
                    params.dst_format,
                ))
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resolution;

    fn params(dst_format: PixelFormat) -> ConverterParams {
        ConverterParams {
            resolution: Resolution::from((4, 2)),
            src_format: PixelFormat::Yuv420p,
            dst_format,
            filter: ScaleFilter::FastBilinear,
        }
    }

    /// A padded 4x2 mid-gray picture.
    fn gray_picture() -> Picture {
        let mut picture = Picture::new();
        picture.allocate(PixelFormat::Yuv420p, Resolution::from((4, 2)), [8, 4, 4]);
        picture.plane_mut(0).fill(126);
        picture.plane_mut(1).fill(128);
        picture.plane_mut(2).fill(128);
        picture
    }

    #[test]
    fn rejects_unsupported_conversions() {
        assert!(matches!(
            SoftwareScalerFactory.create(&params(PixelFormat::Yuv420p)),
            Err(EngineError::UnsupportedConversion(
                PixelFormat::Yuv420p,
                PixelFormat::Yuv420p
            ))
        ));

        let mut bad_source = params(PixelFormat::Bgr32);
        bad_source.src_format = PixelFormat::Rgb565Le;
        assert!(SoftwareScalerFactory.create(&bad_source).is_err());

        let mut empty = params(PixelFormat::Bgr32);
        empty.resolution = Default::default();
        assert!(SoftwareScalerFactory.create(&empty).is_err());
    }

    #[test]
    fn converts_gray_to_bgr32() {
        let mut scaler = SoftwareScalerFactory.create(&params(PixelFormat::Bgr32)).unwrap();
        let mut memory = vec![0u8; 4 * 2 * 4];
        let mut dst =
            FrameDescriptor::fill(&mut memory, PixelFormat::Bgr32, Resolution::from((4, 2)))
                .unwrap();

        scaler.scale(&gray_picture(), &mut dst).unwrap();

        // Y = 126 maps to 128 in full range.
        assert!(memory.chunks(4).all(|pixel| pixel == [128, 128, 128, 0xff]));
    }

    #[test]
    fn rejects_mismatched_geometry() {
        let mut scaler = SoftwareScalerFactory
            .create(&params(PixelFormat::Rgb565Le))
            .unwrap();
        let mut memory = vec![0u8; 64];
        let mut dst =
            FrameDescriptor::fill(&mut memory, PixelFormat::Rgb565Le, Resolution::from((2, 2)))
                .unwrap();

        assert!(scaler.scale(&gray_picture(), &mut dst).is_err());
    }
}
