// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoder sessions.
//!
//! A [`DecoderSession`] owns a decoding engine, the picture the engine decodes into and, for
//! packed output formats, a lazily created converter. Its protocol is:
//!
//! 1. [`submit`] compressed packets, one at a time, until [`is_frame_ready`] returns `true`,
//! 2. [`deliver`] the picture into a caller buffer of at least [`output_byte_size`] bytes.
//!
//! Only one undelivered picture is tracked: a picture completed before the previous one was
//! delivered replaces it.
//!
//! A session is not internally synchronized. All calls on one session must be serialized by the
//! caller, while independent sessions can be used from different threads.
//!
//! [`submit`]: DecoderSession::submit
//! [`is_frame_ready`]: DecoderSession::is_frame_ready
//! [`deliver`]: DecoderSession::deliver
//! [`output_byte_size`]: DecoderSession::output_byte_size

use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::buffer::InputBuffer;
use crate::buffer::OutputBuffer;
use crate::decoded_frame_size;
use crate::engine::initialize_engine_library;
use crate::engine::ConverterParams;
use crate::engine::DecodingEngine;
use crate::engine::DiagnosticSink;
use crate::engine::EngineConfig;
use crate::engine::EngineError;
use crate::engine::FrameDescriptor;
use crate::engine::LogSink;
use crate::engine::Packet;
use crate::engine::Picture;
use crate::engine::ScaleFilter;
use crate::engine::Scaler;
use crate::engine::ScalerFactory;
use crate::image_processing::i420_copy;
use crate::OutputFormat;
use crate::PixelFormat;
use crate::Resolution;

/// Status returned by integer-level interfaces for a buffer that could not be resolved. It is
/// distinct from every status an engine reports.
pub const INVALID_BUFFER_STATUS: i32 = i32::MIN;

/// Error returned when a session cannot be created.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to open the decoding engine")]
    EngineOpen(#[source] EngineError),
    #[error("decoding engine produces {0:?} pictures, expected planar 4:2:0")]
    UnsupportedEngineFormat(PixelFormat),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by [`DecoderSession::submit`].
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("input buffer could not be resolved")]
    InvalidBuffer,
    #[error(transparent)]
    Decode(#[from] EngineError),
}

impl SubmitError {
    /// Returns the negative status code integer-level interfaces report for this error.
    pub fn code(&self) -> i32 {
        match self {
            SubmitError::InvalidBuffer => INVALID_BUFFER_STATUS,
            SubmitError::Decode(e) => e.code(),
        }
    }
}

/// Error returned by [`DecoderSession::deliver`]. None of these consume the pending picture.
#[derive(Error, Debug)]
pub enum DeliverError {
    #[error("no decoded picture is ready")]
    NotReady,
    #[error("output buffer holds {capacity} bytes, {required} are required")]
    BufferTooSmall { required: usize, capacity: usize },
    #[error("output buffer could not be resolved")]
    InvalidBuffer,
    #[error("failed to convert the decoded picture")]
    Conversion(#[from] EngineError),
}

/// Parameters of a decoder session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Format pictures are delivered in. Fixed for the lifetime of the session.
    pub output_format: OutputFormat,
    /// Filter used when the output format requires a conversion.
    pub scale_filter: ScaleFilter,
    /// Where the decoding engine reports its diagnostics.
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

impl SessionConfig {
    pub fn new(output_format: OutputFormat) -> Self {
        Self {
            output_format,
            scale_filter: Default::default(),
            diagnostics: Arc::new(LogSink),
        }
    }

    pub fn with_scale_filter(mut self, filter: ScaleFilter) -> Self {
        self.scale_filter = filter;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Configuration the decoding engine is opened with. Engines always decode to planar 4:2:0,
    /// whatever the output format.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            pixel_format: PixelFormat::Yuv420p,
            diagnostics: Arc::clone(&self.diagnostics),
        }
    }
}

/// A converter along with the parameters it was built for.
struct CachedConverter<C> {
    params: ConverterParams,
    scaler: C,
}

/// A decoding context, from compressed packets to pictures in caller memory.
pub struct DecoderSession<E, S>
where
    E: DecodingEngine,
    S: ScalerFactory,
{
    // Fields are dropped in declaration order: the engine is released first, then the decode
    // target, then the converter.
    engine: E,
    /// Picture the engine decodes into, reused across submissions.
    decode_frame: Picture,
    converter: Option<CachedConverter<S::Scaler>>,
    scalers: S,
    output_format: OutputFormat,
    scale_filter: ScaleFilter,
    /// Whether `decode_frame` holds a picture not delivered yet.
    frame_ready: bool,
}

impl<E, S> DecoderSession<E, S>
where
    E: DecodingEngine + 'static,
    S: ScalerFactory + Default,
{
    /// Creates a session, opening a new engine instance.
    pub fn open(config: SessionConfig) -> Result<Self> {
        debug!("Creating decoder session for {:?}", config.output_format);

        initialize_engine_library::<E>();
        let engine = E::open(&config.engine_config()).map_err(Error::EngineOpen)?;

        Self::new(engine, S::default(), config)
    }
}

impl<E, S> DecoderSession<E, S>
where
    E: DecodingEngine,
    S: ScalerFactory,
{
    /// Creates a session around an already opened `engine`.
    pub fn new(engine: E, scalers: S, config: SessionConfig) -> Result<Self> {
        let engine_format = engine.pixel_format();
        if engine_format != PixelFormat::Yuv420p {
            return Err(Error::UnsupportedEngineFormat(engine_format));
        }

        Ok(Self {
            engine,
            decode_frame: Picture::new(),
            converter: None,
            scalers,
            output_format: config.output_format,
            scale_filter: config.scale_filter,
            frame_ready: false,
        })
    }

    /// Releases the engine, the decode target and the converter, in that order.
    pub fn destroy(self) {
        debug!("Destroying decoder session");
        drop(self);
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    /// Submits one compressed packet of `length` bytes from `buffer`, to be decoded with `pts`
    /// as its presentation timestamp.
    ///
    /// A `None` buffer submits an empty packet, which lets the engine output the pictures it
    /// holds back, e.g. at the end of the stream.
    ///
    /// On success the number of bytes consumed by the engine is returned. Decode errors only
    /// affect the packet they are reported for, the session can keep being fed.
    pub fn submit(
        &mut self,
        buffer: Option<&dyn InputBuffer>,
        length: usize,
        pts: Option<i64>,
    ) -> std::result::Result<usize, SubmitError> {
        let data = match buffer {
            None => {
                debug!("Received null buffer, sending empty packet to decoder");
                None
            }
            Some(buffer) => {
                let Some(data) = buffer.resolve() else {
                    debug!("Error getting input buffer address");
                    return Err(SubmitError::InvalidBuffer);
                };

                let Some(data) = data.get(..length) else {
                    debug!(
                        "Input buffer holds {} bytes, {} were submitted",
                        data.len(),
                        length
                    );
                    return Err(SubmitError::InvalidBuffer);
                };

                Some(data)
            }
        };

        let packet = Packet { data, pts };

        let status = self
            .engine
            .decode(&packet, &mut self.decode_frame)
            .map_err(|e| {
                debug!("Decode error: {:#}", e);
                SubmitError::Decode(e)
            })?;

        if status.frame_finished {
            if self.frame_ready {
                debug!("Dropping undelivered picture in favor of a newer one");
            }
            self.frame_ready = true;
        }

        Ok(status.consumed)
    }

    /// Submits `data` as one packet.
    pub fn submit_slice(
        &mut self,
        data: &[u8],
        pts: Option<i64>,
    ) -> std::result::Result<usize, SubmitError> {
        self.submit(Some(&data), data.len(), pts)
    }

    /// Submits an empty packet, asking the engine to output a picture it holds back.
    pub fn flush(&mut self) -> std::result::Result<usize, SubmitError> {
        self.submit(None, 0, None)
    }

    /// Whether a decoded picture is waiting to be delivered.
    pub fn is_frame_ready(&self) -> bool {
        self.frame_ready
    }

    /// Resolution of the stream. Empty until a first picture has been decoded.
    pub fn resolution(&self) -> Resolution {
        self.engine.coded_resolution()
    }

    pub fn width(&self) -> u32 {
        self.resolution().width
    }

    pub fn height(&self) -> u32 {
        self.resolution().height
    }

    /// Size of the buffer required to [`deliver`](Self::deliver) a picture. Zero until a first
    /// picture has been decoded.
    pub fn output_byte_size(&self) -> usize {
        let resolution = self.resolution();

        decoded_frame_size(
            self.output_format.pixel_format(),
            resolution.width as usize,
            resolution.height as usize,
        )
    }

    /// Writes the pending picture into `out` in the session's output format, and returns its
    /// presentation timestamp, if it has one.
    ///
    /// The picture is only consumed on success. On error `out` is left untouched and the call
    /// can be retried, e.g. with a larger buffer.
    pub fn deliver(
        &mut self,
        out: &mut dyn OutputBuffer,
    ) -> std::result::Result<Option<i64>, DeliverError> {
        if !self.frame_ready {
            return Err(DeliverError::NotReady);
        }

        let Some(out) = out.resolve_mut() else {
            debug!("Error getting output buffer address");
            return Err(DeliverError::InvalidBuffer);
        };

        let required = self.output_byte_size();
        if out.len() < required {
            debug!(
                "Output buffer too small: {} bytes, {} required",
                out.len(),
                required
            );
            return Err(DeliverError::BufferTooSmall {
                required,
                capacity: out.len(),
            });
        }

        let resolution = self.resolution();
        if self.decode_frame.resolution() != resolution
            || self.decode_frame.format() != PixelFormat::Yuv420p
        {
            return Err(DeliverError::Conversion(
                anyhow::anyhow!(
                    "decoded picture is {:?} {:?}, stream is {:?}",
                    self.decode_frame.format(),
                    self.decode_frame.resolution(),
                    resolution
                )
                .into(),
            ));
        }

        let out = &mut out[..required];
        match self.output_format.pixel_format() {
            PixelFormat::Yuv420p => i420_copy(
                self.decode_frame.data(),
                out,
                resolution.width as usize,
                resolution.height as usize,
                self.decode_frame.strides(),
                self.decode_frame.offsets(),
            ),
            dst_format => {
                let params = ConverterParams {
                    resolution,
                    src_format: self.engine.pixel_format(),
                    dst_format,
                    filter: self.scale_filter,
                };

                let converter = match self.converter.take() {
                    Some(converter) if converter.params == params => converter,
                    _ => {
                        debug!("Creating converter for {:?}", params);
                        CachedConverter {
                            params,
                            scaler: self.scalers.create(&params)?,
                        }
                    }
                };
                let converter = self.converter.insert(converter);

                let mut dst = FrameDescriptor::fill(out, dst_format, resolution)?;
                converter.scaler.scale(&self.decode_frame, &mut dst)?;
            }
        }

        self.frame_ready = false;

        Ok(self.decode_frame.pts())
    }
}
