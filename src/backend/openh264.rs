// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoding engine backed by Cisco's OpenH264, through the `openh264` crate.
//!
//! OpenH264 may hold pictures back to output them in display order. Pictures still held at the
//! end of the stream are drained by empty packets, one per call. The timestamps of the packets
//! starting a picture are kept pending, and every output picture takes the earliest of them.

use std::collections::VecDeque;
use std::ptr::addr_of_mut;
use std::sync::Arc;

use anyhow::anyhow;
use log::Level;
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use openh264_sys2::SBufferInfo;
use openh264_sys2::DECODER_OPTION;
use openh264_sys2::DECODER_OPTION_NUM_OF_FRAMES_REMAINING_IN_BUFFER;

use crate::engine::DecodeStatus;
use crate::engine::DecodingEngine;
use crate::engine::DiagnosticSink;
use crate::engine::EngineConfig;
use crate::engine::EngineError;
use crate::engine::EngineResult;
use crate::engine::Packet;
use crate::engine::Picture;
use crate::engine::INVALID_DATA_STATUS;
use crate::nalu::H264NalIterator;
use crate::nalu::Nalu;
use crate::nalu::NaluHeader;
use crate::PixelFormat;
use crate::Resolution;

/// Whether `nalu` is the first slice of a picture, i.e. its `first_mb_in_slice` is 0.
fn starts_picture(nalu: &Nalu<NaluHeader>) -> bool {
    // ue(v) 0 is coded as a single 1 bit.
    nalu.header().type_.is_slice() && nalu.as_ref().get(1).is_some_and(|b| b & 0x80 != 0)
}

/// Copies decoded planes into `picture`, keeping their strides.
fn copy_planes(
    picture: &mut Picture,
    resolution: Resolution,
    strides: [usize; 3],
    planes: [&[u8]; 3],
) {
    picture.allocate(PixelFormat::Yuv420p, resolution, strides);

    for (plane, src) in planes.into_iter().enumerate() {
        let dst = picture.plane_mut(plane);
        let len = dst.len().min(src.len());
        dst[..len].copy_from_slice(&src[..len]);
    }
}

/// Timestamps of the pictures submitted but not output yet.
#[derive(Debug, Default)]
struct PendingTimestamps(VecDeque<Option<i64>>);

impl PendingTimestamps {
    fn push(&mut self, pts: Option<i64>) {
        self.0.push_back(pts);
    }

    /// Forgets the last pushed timestamp, whose picture failed to decode.
    fn cancel_last(&mut self) {
        self.0.pop_back();
    }

    /// Takes the earliest pending timestamp. `None` if nothing is pending.
    fn take_earliest(&mut self) -> Option<Option<i64>> {
        let index = self
            .0
            .iter()
            .enumerate()
            .min_by_key(|(_, pts)| **pts)
            .map(|(index, _)| index)?;

        self.0.remove(index)
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

pub struct OpenH264Engine {
    decoder: Decoder,
    coded_resolution: Resolution,
    pending_pts: PendingTimestamps,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl OpenH264Engine {
    fn invalid_data(&self, message: String) -> EngineError {
        self.diagnostics.message(Level::Warn, &message);

        EngineError::Decode {
            code: INVALID_DATA_STATUS,
            source: anyhow!(message),
        }
    }

    /// Outputs one picture still held by the decoder, if any.
    fn flush_one(&mut self, picture: &mut Picture) -> EngineResult<Option<Resolution>> {
        let mut remaining: DECODER_OPTION = 0;
        let mut dst = [std::ptr::null_mut::<u8>(); 3];
        let mut info = SBufferInfo::default();

        // SAFETY: `remaining`, `dst` and `info` outlive the calls they are passed to. The planes
        // returned in `dst` are owned by the decoder and only read before it is used again.
        unsafe {
            let raw = self.decoder.raw_api();

            raw.get_option(
                DECODER_OPTION_NUM_OF_FRAMES_REMAINING_IN_BUFFER,
                addr_of_mut!(remaining).cast(),
            );
            if remaining <= 0 {
                return Ok(None);
            }

            let state = raw.flush_frame(dst.as_mut_ptr(), &mut info);
            if state != 0 {
                return Err(self.invalid_data(format!(
                    "OpenH264 failed to flush picture: state {:#x}",
                    state
                )));
            }

            if info.iBufferStatus == 0 || dst.iter().any(|plane| plane.is_null()) {
                return Ok(None);
            }

            let buffer = info.UsrData.sSystemBuffer;
            let (Ok(width), Ok(height), Ok(y_stride), Ok(uv_stride)) = (
                usize::try_from(buffer.iWidth),
                usize::try_from(buffer.iHeight),
                usize::try_from(buffer.iStride[0]),
                usize::try_from(buffer.iStride[1]),
            ) else {
                return Err(
                    self.invalid_data("OpenH264 flushed a picture of invalid geometry".into())
                );
            };

            let y = std::slice::from_raw_parts(dst[0], height * y_stride);
            let u = std::slice::from_raw_parts(dst[1], height * uv_stride / 2);
            let v = std::slice::from_raw_parts(dst[2], height * uv_stride / 2);
            let resolution = Resolution::from((width as u32, height as u32));

            copy_planes(picture, resolution, [y_stride, uv_stride, uv_stride], [y, u, v]);

            Ok(Some(resolution))
        }
    }

    /// Completes the output of a picture of `resolution` written into `picture`.
    fn picture_output(&mut self, picture: &mut Picture, resolution: Resolution, pts: Option<i64>) {
        picture.set_pts(self.pending_pts.take_earliest().unwrap_or(pts));

        if resolution != self.coded_resolution {
            self.diagnostics.message(
                Level::Info,
                &format!(
                    "stream resolution is now {}x{}",
                    resolution.width, resolution.height
                ),
            );
        }
        self.coded_resolution = resolution;
    }
}

impl DecodingEngine for OpenH264Engine {
    fn open(config: &EngineConfig) -> EngineResult<Self> {
        if config.pixel_format != PixelFormat::Yuv420p {
            return Err(EngineError::UnsupportedFormat(config.pixel_format));
        }

        let decoder = Decoder::new().map_err(|e| EngineError::Open(anyhow!("{:?}", e)))?;
        config
            .diagnostics
            .message(Level::Debug, "OpenH264 decoder initialized");

        Ok(Self {
            decoder,
            coded_resolution: Default::default(),
            pending_pts: Default::default(),
            diagnostics: Arc::clone(&config.diagnostics),
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
            let Some(resolution) = self.flush_one(picture)? else {
                self.diagnostics
                    .message(Level::Debug, "empty packet, no held picture left");
                self.pending_pts.clear();
                return Ok(Default::default());
            };
            self.picture_output(picture, resolution, None);

            return Ok(DecodeStatus {
                consumed: 0,
                frame_finished: true,
            });
        }
        let data = packet.data.unwrap_or_default();

        let new_picture = H264NalIterator::new(data).any(|nalu| starts_picture(&nalu));
        if new_picture {
            self.pending_pts.push(packet.pts);
        }

        let decoded = self.decoder.decode(data).map(|yuv| {
            yuv.map(|yuv| {
                let (width, height) = yuv.dimensions();
                let (y_stride, u_stride, v_stride) = yuv.strides();
                let resolution = Resolution::from((width as u32, height as u32));

                copy_planes(
                    picture,
                    resolution,
                    [y_stride, u_stride, v_stride],
                    [yuv.y(), yuv.u(), yuv.v()],
                );

                resolution
            })
        });

        let resolution = match decoded {
            Ok(resolution) => resolution,
            Err(e) => {
                if new_picture {
                    self.pending_pts.cancel_last();
                }

                return Err(
                    self.invalid_data(format!("OpenH264 failed to decode packet: {:?}", e))
                );
            }
        };

        if let Some(resolution) = resolution {
            self.picture_output(picture, resolution, packet.pts);
        }

        Ok(DecodeStatus {
            consumed: data.len(),
            frame_finished: resolution.is_some(),
        })
    }
}
