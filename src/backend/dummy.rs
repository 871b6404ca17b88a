// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let sessions run so we can test
//! them in isolation.
//!
//! [`DummyEngine`] does not decode anything. It splits packets into NAL units and emits one
//! synthetic picture for every packet containing a slice, after having seen an SPS. Pictures can
//! be held back to mimic the reordering delay of a real decoder.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use anyhow::anyhow;
use log::Level;

use crate::backend::software::SoftwareScaler;
use crate::engine::ConverterParams;
use crate::engine::DecodeStatus;
use crate::engine::DecodingEngine;
use crate::engine::DiagnosticSink;
use crate::engine::EngineConfig;
use crate::engine::EngineError;
use crate::engine::EngineResult;
use crate::engine::FrameDescriptor;
use crate::engine::Packet;
use crate::engine::Picture;
use crate::engine::Scaler;
use crate::engine::ScalerFactory;
use crate::engine::INVALID_DATA_STATUS;
use crate::nalu::H264NalIterator;
use crate::nalu::NaluType;
use crate::PixelFormat;
use crate::Resolution;

/// Value written to the padding bytes of each line.
pub const PADDING_BYTE: u8 = 0xee;

/// Records the order in which dummy resources are released.
#[derive(Debug, Clone, Default)]
pub struct ReleaseLog(Arc<Mutex<Vec<&'static str>>>);

impl ReleaseLog {
    fn record(&self, resource: &'static str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resource);
    }

    /// Names of the released resources, in release order.
    pub fn entries(&self) -> Vec<&'static str> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Dummy decoding engine that can be used to exercise sessions.
pub struct DummyEngine {
    /// Resolution of the pictures produced once the stream has started.
    stream_resolution: Resolution,
    /// New stream resolution, applied from the picture with the given sequence number on.
    resolution_change: Option<(u32, Resolution)>,
    /// Resolution reported to the session, empty until the first picture is output.
    coded_resolution: Resolution,
    /// Extra bytes at the end of each line of output pictures.
    stride_padding: usize,
    /// Number of pictures held back before one is output.
    reorder_depth: usize,
    seen_sps: bool,
    /// Timestamps and sequence numbers of the pictures held back.
    held: VecDeque<(Option<i64>, u32)>,
    num_pictures: u32,
    diagnostics: Arc<dyn DiagnosticSink>,
    release_log: Option<ReleaseLog>,
}

impl DummyEngine {
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.stream_resolution = resolution;
        self
    }

    /// Switches the stream to `resolution` starting with the `seq`th picture.
    pub fn with_resolution_change(mut self, seq: u32, resolution: Resolution) -> Self {
        self.resolution_change = Some((seq, resolution));
        self
    }

    pub fn with_stride_padding(mut self, padding: usize) -> Self {
        self.stride_padding = padding;
        self
    }

    pub fn with_reorder_depth(mut self, depth: usize) -> Self {
        self.reorder_depth = depth;
        self
    }

    pub fn with_release_log(mut self, log: ReleaseLog) -> Self {
        self.release_log = Some(log);
        self
    }

    /// Returns the value of the luma samples of the picture with sequence number `seq`.
    pub fn luma_value(seq: u32) -> u8 {
        16u32.wrapping_add(seq.wrapping_mul(8)) as u8
    }

    /// Returns the value of the U and V samples of the picture with sequence number `seq`.
    pub fn chroma_values(seq: u32) -> (u8, u8) {
        (128u32.wrapping_sub(seq) as u8, 128u32.wrapping_add(seq) as u8)
    }

    fn invalid_data(&self, reason: &str) -> EngineError {
        self.diagnostics.message(Level::Warn, reason);

        EngineError::Decode {
            code: INVALID_DATA_STATUS,
            source: anyhow!("{}", reason),
        }
    }

    /// Outputs the held-back picture with the smallest timestamp, if any.
    fn output_held(&mut self, picture: &mut Picture) -> bool {
        let Some(index) = self
            .held
            .iter()
            .enumerate()
            .min_by_key(|(_, (pts, seq))| (*pts, *seq))
            .map(|(index, _)| index)
        else {
            return false;
        };

        let Some((pts, seq)) = self.held.remove(index) else {
            return false;
        };

        self.render(picture, seq);
        picture.set_pts(pts);
        self.coded_resolution = self.stream_resolution;

        true
    }

    fn render(&mut self, picture: &mut Picture, seq: u32) {
        if let Some((from, resolution)) = self.resolution_change {
            if seq >= from && resolution != self.stream_resolution {
                self.diagnostics.message(
                    Level::Info,
                    &format!(
                        "stream resolution is now {}x{}",
                        resolution.width, resolution.height
                    ),
                );
                self.stream_resolution = resolution;
            }
        }

        let resolution = self.stream_resolution;
        let width = resolution.width as usize;
        let format = PixelFormat::Yuv420p;
        let strides = [0, 1, 2].map(|plane| format.plane_width(plane, width) + self.stride_padding);

        picture.allocate(format, resolution, strides);

        let (u, v) = Self::chroma_values(seq);
        for (plane, value) in [Self::luma_value(seq), u, v].into_iter().enumerate() {
            let line_size = format.plane_width(plane, width);
            let stride = picture.strides()[plane];
            if stride == 0 {
                continue;
            }

            for line in picture.plane_mut(plane).chunks_mut(stride) {
                let (visible, padding) = line.split_at_mut(line_size.min(line.len()));
                visible.fill(value);
                padding.fill(PADDING_BYTE);
            }
        }
    }
}

impl DecodingEngine for DummyEngine {
    fn open(config: &EngineConfig) -> EngineResult<Self> {
        if config.pixel_format != PixelFormat::Yuv420p {
            return Err(EngineError::UnsupportedFormat(config.pixel_format));
        }

        Ok(Self {
            stream_resolution: Resolution::from((320, 200)),
            resolution_change: None,
            coded_resolution: Default::default(),
            stride_padding: 0,
            reorder_depth: 0,
            seen_sps: false,
            held: Default::default(),
            num_pictures: 0,
            diagnostics: Arc::clone(&config.diagnostics),
            release_log: None,
        })
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Yuv420p
    }

    fn coded_resolution(&self) -> Resolution {
        self.coded_resolution
    }

    fn decode(&mut self, packet: &Packet, picture: &mut Picture) -> EngineResult<DecodeStatus> {
        if packet.is_empty() {
            self.diagnostics
                .message(Level::Debug, "empty packet, draining held pictures");

            return Ok(DecodeStatus {
                consumed: 0,
                frame_finished: self.output_held(picture),
            });
        }
        let data = packet.data.unwrap_or_default();

        let mut num_nalus = 0;
        let mut has_slice = false;
        for nalu in H264NalIterator::new(data) {
            num_nalus += 1;
            match nalu.header().type_ {
                NaluType::Sps => self.seen_sps = true,
                type_ if type_.is_slice() => {
                    if !self.seen_sps {
                        return Err(self.invalid_data("slice received before any SPS"));
                    }
                    has_slice = true;
                }
                _ => (),
            }
        }

        if num_nalus == 0 {
            return Err(self.invalid_data("no NAL unit found in packet"));
        }

        let mut frame_finished = false;
        if has_slice {
            self.held.push_back((packet.pts, self.num_pictures));
            self.num_pictures += 1;

            if self.held.len() > self.reorder_depth {
                frame_finished = self.output_held(picture);
            }
        }

        Ok(DecodeStatus {
            consumed: data.len(),
            frame_finished,
        })
    }
}

impl Drop for DummyEngine {
    fn drop(&mut self) {
        if let Some(log) = &self.release_log {
            log.record("engine");
        }
    }
}

/// Scaler factory recording the converters it creates. Conversion itself is done by
/// [`SoftwareScaler`].
#[derive(Debug, Clone, Default)]
pub struct DummyScalerFactory {
    created: Arc<Mutex<Vec<ConverterParams>>>,
    release_log: Option<ReleaseLog>,
    fail_creation: bool,
}

impl DummyScalerFactory {
    pub fn with_release_log(mut self, log: ReleaseLog) -> Self {
        self.release_log = Some(log);
        self
    }

    /// Makes every converter creation fail.
    pub fn failing(mut self) -> Self {
        self.fail_creation = true;
        self
    }

    /// Number of converters created so far by this factory or its clones.
    pub fn num_created(&self) -> usize {
        self.created_params().len()
    }

    /// Parameters of the converters created so far, in creation order.
    pub fn created_params(&self) -> Vec<ConverterParams> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ScalerFactory for DummyScalerFactory {
    type Scaler = DummyScaler;

    fn create(&self, params: &ConverterParams) -> EngineResult<DummyScaler> {
        if self.fail_creation {
            return Err(anyhow!("converter creation disabled").into());
        }

        let inner = SoftwareScaler::new(*params)?;
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*inner.params());

        Ok(DummyScaler {
            inner,
            release_log: self.release_log.clone(),
        })
    }
}

pub struct DummyScaler {
    inner: SoftwareScaler,
    release_log: Option<ReleaseLog>,
}

impl Scaler for DummyScaler {
    fn scale(&mut self, src: &Picture, dst: &mut FrameDescriptor) -> EngineResult<()> {
        self.inner.scale(src, dst)
    }
}

impl Drop for DummyScaler {
    fn drop(&mut self) {
        if let Some(log) = &self.release_log {
            log.record("converter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x0a];
    const IDR: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84];

    fn packet(data: &[u8], pts: i64) -> Packet {
        Packet {
            data: Some(data),
            pts: Some(pts),
        }
    }

    #[test]
    fn slice_before_sps_is_invalid() {
        let mut engine = DummyEngine::open(&Default::default()).unwrap();
        let mut picture = Picture::new();

        let err = engine.decode(&packet(IDR, 0), &mut picture).unwrap_err();
        assert_eq!(err.code(), INVALID_DATA_STATUS);
        assert!(engine.coded_resolution().is_empty());
    }

    #[test]
    fn renders_padded_pictures() {
        let mut engine = DummyEngine::open(&Default::default())
            .unwrap()
            .with_resolution(Resolution::from((6, 4)))
            .with_stride_padding(2);
        let mut picture = Picture::new();

        let status = engine
            .decode(&packet(&[SPS, IDR].concat(), 7), &mut picture)
            .unwrap();

        assert!(status.frame_finished);
        assert_eq!(status.consumed, SPS.len() + IDR.len());
        assert_eq!(engine.coded_resolution(), Resolution::from((6, 4)));
        assert_eq!(picture.pts(), Some(7));
        assert_eq!(picture.strides(), [8, 5, 5]);
        assert_eq!(&picture.plane(0)[..8], &[16, 16, 16, 16, 16, 16, 0xee, 0xee]);
        assert_eq!(&picture.plane(1)[..5], &[128, 128, 128, 0xee, 0xee]);
    }

    #[test]
    fn reorders_by_timestamp() {
        let mut engine = DummyEngine::open(&Default::default())
            .unwrap()
            .with_reorder_depth(2);
        let mut picture = Picture::new();
        let mut output = Vec::new();

        engine.decode(&packet(SPS, 0), &mut picture).unwrap();
        for pts in [0, 3, 1, 2] {
            if engine
                .decode(&packet(IDR, pts), &mut picture)
                .unwrap()
                .frame_finished
            {
                output.push(picture.pts());
            }
        }
        while engine
            .decode(&Packet { data: None, pts: None }, &mut picture)
            .unwrap()
            .frame_finished
        {
            output.push(picture.pts());
        }

        assert_eq!(output, [Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn zero_length_packet_drains() {
        let mut engine = DummyEngine::open(&Default::default())
            .unwrap()
            .with_reorder_depth(1);
        let mut picture = Picture::new();

        engine.decode(&packet(SPS, 0), &mut picture).unwrap();
        assert!(!engine.decode(&packet(IDR, 5), &mut picture).unwrap().frame_finished);

        let status = engine.decode(&packet(&[], 9), &mut picture).unwrap();
        assert_eq!(status.consumed, 0);
        assert!(status.frame_finished);
        assert_eq!(picture.pts(), Some(5));
    }

    #[test]
    fn resolution_change_applies_from_sequence_number() {
        let mut engine = DummyEngine::open(&Default::default())
            .unwrap()
            .with_resolution(Resolution::from((16, 8)))
            .with_resolution_change(1, Resolution::from((8, 4)));
        let mut picture = Picture::new();

        engine.decode(&packet(SPS, 0), &mut picture).unwrap();
        engine.decode(&packet(IDR, 0), &mut picture).unwrap();
        assert_eq!(engine.coded_resolution(), Resolution::from((16, 8)));

        engine.decode(&packet(IDR, 1), &mut picture).unwrap();
        assert_eq!(engine.coded_resolution(), Resolution::from((8, 4)));
        assert_eq!(picture.resolution(), Resolution::from((8, 4)));
    }
}
