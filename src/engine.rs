// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interfaces to the engines a session drives.
//!
//! A session talks to two collaborators whose algorithms are out of its scope:
//!
//! * a [`DecodingEngine`], which turns compressed packets into pictures written to a
//!   session-owned [`Picture`],
//! * a [`ScalerFactory`], which builds [`Scaler`]s able to convert a [`Picture`] into another
//!   pixel format, writing into a [`FrameDescriptor`] that points at caller memory.
//!
//! Implementations live in [`crate::backend`].

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;

use log::Level;
use thiserror::Error;

use crate::decoded_frame_size;
use crate::PixelFormat;
use crate::Resolution;

/// Status reported for packets the engine could not make sense of.
pub const INVALID_DATA_STATUS: i32 = -0x4144_4e49;

/// Status reported for engine failures that carry no more specific code.
pub const GENERIC_ERROR_STATUS: i32 = -1;

/// Error returned by engine methods.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to open decoding engine: {0}")]
    Open(#[source] anyhow::Error),
    #[error("decode error (status {code}): {source}")]
    Decode {
        code: i32,
        #[source]
        source: anyhow::Error,
    },
    #[error("pixel format {0:?} is not supported by this engine")]
    UnsupportedFormat(PixelFormat),
    #[error("no conversion available from {0:?} to {1:?}")]
    UnsupportedConversion(PixelFormat, PixelFormat),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Returns the negative status code corresponding to this error.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::Decode { code, .. } => *code,
            _ => GENERIC_ERROR_STATUS,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Receives the diagnostics emitted by an engine.
///
/// Diagnostics have no effect on decoding. The sink is handed to the engine when it is opened,
/// so different sessions can route their engine messages to different places.
pub trait DiagnosticSink: Send + Sync {
    fn message(&self, level: Level, message: &str);
}

/// Sink forwarding engine diagnostics to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn message(&self, level: Level, message: &str) {
        log::log!(target: "h264_bridge::engine", level, "{}", message);
    }
}

/// Parameters used to open a [`DecodingEngine`].
#[derive(Clone)]
pub struct EngineConfig {
    /// Format the engine must write decoded pictures in.
    pub pixel_format: PixelFormat,
    /// Where the engine reports its diagnostics.
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Yuv420p,
            diagnostics: Arc::new(LogSink),
        }
    }
}

/// Performs the process-wide library initialization of engine `E`, at most once per engine type.
///
/// Concurrent first uses are serialized: callers return only once the initialization has
/// completed.
pub fn initialize_engine_library<E: DecodingEngine + 'static>() {
    static INITIALIZED: OnceLock<Mutex<HashSet<TypeId>>> = OnceLock::new();

    let mut initialized = INITIALIZED
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if initialized.insert(TypeId::of::<E>()) {
        log::debug!(
            "Initializing engine library for {}",
            std::any::type_name::<E>()
        );
        E::initialize_library();
    }
}

/// Position of one plane inside a picture's backing memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    pub stride: usize,
}

/// Computes the plane layout of a `format` picture with the given strides, returning the layout
/// and the total size needed to store it.
fn layout_planes(
    format: PixelFormat,
    resolution: Resolution,
    strides: [usize; 3],
) -> ([PlaneLayout; 3], usize) {
    let mut planes = [PlaneLayout::default(); 3];
    let mut offset = 0;

    for (plane, layout) in planes.iter_mut().enumerate().take(format.num_planes()) {
        let stride = strides[plane];
        *layout = PlaneLayout { offset, stride };
        offset += stride * format.plane_height(plane, resolution.height as usize);
    }

    (planes, offset)
}

/// A decoded picture, owned by a session and written by its decoding engine.
///
/// The backing memory is a single allocation reused from one picture to the next. Lines of each
/// plane may be padded, so readers must go through [`Picture::strides`] rather than assume that
/// the stride equals the width.
#[derive(Debug, Default)]
pub struct Picture {
    format: PixelFormat,
    resolution: Resolution,
    planes: [PlaneLayout; 3],
    data: Vec<u8>,
    pts: Option<i64>,
}

impl Picture {
    pub fn new() -> Self {
        Default::default()
    }

    /// Prepares the picture to receive a `format` image of `resolution`, with each plane using
    /// the corresponding entry of `strides`.
    ///
    /// Strides smaller than the plane width are raised to it. The previous content is only kept
    /// if the layout is unchanged.
    pub fn allocate(&mut self, format: PixelFormat, resolution: Resolution, strides: [usize; 3]) {
        let mut strides = strides;
        for (plane, stride) in strides.iter_mut().enumerate() {
            *stride = (*stride).max(format.plane_width(plane, resolution.width as usize));
        }

        let (planes, size) = layout_planes(format, resolution, strides);

        self.format = format;
        self.resolution = resolution;
        self.planes = planes;
        self.data.resize(size, 0);
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn strides(&self) -> [usize; 3] {
        self.planes.map(|p| p.stride)
    }

    pub fn offsets(&self) -> [usize; 3] {
        self.planes.map(|p| p.offset)
    }

    /// Whole backing memory of the picture, padding included.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn plane_range(&self, plane: usize) -> std::ops::Range<usize> {
        let layout = self.planes[plane];
        let lines = self
            .format
            .plane_height(plane, self.resolution.height as usize);
        let start = layout.offset.min(self.data.len());
        let end = (layout.offset + layout.stride * lines).min(self.data.len());

        start..end
    }

    /// Returns the memory of `plane`, padding included. Planes the format does not have are
    /// empty.
    pub fn plane(&self, plane: usize) -> &[u8] {
        &self.data[self.plane_range(plane)]
    }

    pub fn plane_mut(&mut self, plane: usize) -> &mut [u8] {
        let range = self.plane_range(plane);
        &mut self.data[range]
    }

    /// Timestamp of the packet this picture was decoded from, if any.
    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }
}

/// Describes caller memory a [`Scaler`] writes a converted picture into.
///
/// The descriptor borrows the memory for as long as it exists, which is at most the duration of
/// one delivery. Planes are laid out without padding, one after the other.
#[derive(Debug)]
pub struct FrameDescriptor<'a> {
    data: &'a mut [u8],
    format: PixelFormat,
    resolution: Resolution,
    planes: [PlaneLayout; 3],
}

impl<'a> FrameDescriptor<'a> {
    /// Points a descriptor for a `format` picture of `resolution` at `data`.
    ///
    /// Fails if `data` is too small to hold the picture.
    pub fn fill(
        data: &'a mut [u8],
        format: PixelFormat,
        resolution: Resolution,
    ) -> EngineResult<Self> {
        let width = resolution.width as usize;
        let strides = [0, 1, 2].map(|plane| format.plane_width(plane, width));
        let (planes, size) = layout_planes(format, resolution, strides);

        if data.len() < size {
            return Err(anyhow::anyhow!(
                "destination holds {} bytes but a {:?} {}x{} picture needs {}",
                data.len(),
                format,
                resolution.width,
                resolution.height,
                size
            )
            .into());
        }

        debug_assert_eq!(
            size,
            decoded_frame_size(format, width, resolution.height as usize)
        );

        Ok(Self {
            data: &mut data[..size],
            format,
            resolution,
            planes,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }
}

/// One compressed unit submitted to a [`DecodingEngine`].
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    /// Compressed data, or `None` for an empty packet asking the engine to drain pictures it is
    /// holding back.
    pub data: Option<&'a [u8]>,
    /// Presentation timestamp to attach to the picture this packet produces.
    pub pts: Option<i64>,
}

impl<'a> Packet<'a> {
    pub fn is_empty(&self) -> bool {
        self.data.map_or(true, <[u8]>::is_empty)
    }
}

/// Outcome of a successful [`DecodingEngine::decode`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStatus {
    /// Number of bytes of the packet consumed by the engine.
    pub consumed: usize,
    /// Whether a complete picture has been written to the target [`Picture`].
    pub frame_finished: bool,
}

/// An H.264 decoding engine.
///
/// The engine decodes into a picture owned by the caller, the same picture being passed to
/// every call. The engine may hold pictures back internally (e.g. for B-frame reordering) and
/// release them on later calls, including calls with an empty [`Packet`].
pub trait DecodingEngine {
    /// Opens an engine instance. Fails if the engine cannot produce `config.pixel_format`.
    fn open(config: &EngineConfig) -> EngineResult<Self>
    where
        Self: Sized;

    /// One-time, process-wide initialization of the underlying library. Called through
    /// [`initialize_engine_library`].
    fn initialize_library() {}

    /// Pixel format of the pictures written by [`DecodingEngine::decode`].
    fn pixel_format(&self) -> PixelFormat;

    /// Resolution of the stream, as parsed from the bitstream. Empty until the first picture has
    /// been decoded.
    fn coded_resolution(&self) -> Resolution;

    /// Decodes `packet`, writing a picture into `picture` if one is completed by this call.
    fn decode(&mut self, packet: &Packet, picture: &mut Picture) -> EngineResult<DecodeStatus>;
}

/// Resampling filter used by scalers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ScaleFilter {
    /// Fast, low quality filter.
    #[default]
    FastBilinear,
    Bilinear,
}

/// Everything a [`Scaler`] is specialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConverterParams {
    pub resolution: Resolution,
    pub src_format: PixelFormat,
    pub dst_format: PixelFormat,
    pub filter: ScaleFilter,
}

/// Builds [`Scaler`]s.
pub trait ScalerFactory {
    type Scaler: Scaler;

    fn create(&self, params: &ConverterParams) -> EngineResult<Self::Scaler>;
}

/// Converts pictures from one pixel format to another, with fixed geometry.
pub trait Scaler {
    /// Converts the whole of `src` into `dst` in one call.
    fn scale(&mut self, src: &Picture, dst: &mut FrameDescriptor) -> EngineResult<()>;
}
