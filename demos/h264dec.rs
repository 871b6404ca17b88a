// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! h264dec, a simple decoder program using h264-bridge. Capable of computing MD5 checksums from
//! the decoded frames and writing them to a file in any supported output format.

use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use argh::FromArgs;
use h264_bridge::backend::openh264::OpenH264Engine;
use h264_bridge::backend::software::SoftwareScalerFactory;
use h264_bridge::engine::ScaleFilter;
use h264_bridge::nalu::H264NalIterator;
use h264_bridge::session::DecoderSession;
use h264_bridge::session::SessionConfig;
use h264_bridge::OutputFormat;

#[derive(Debug)]
enum Md5Computation {
    Stream,
    Frame,
}

impl FromStr for Md5Computation {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(Md5Computation::Stream),
            "frame" => Ok(Md5Computation::Frame),
            _ => Err("unrecognized MD5 computation option. Valid values: stream, frame"),
        }
    }
}

/// Simple H.264 player using h264-bridge
#[derive(Debug, FromArgs)]
struct Args {
    /// input file, an Annex B H.264 stream
    #[argh(positional)]
    input: PathBuf,

    /// output file to write the decoded frames to
    #[argh(option)]
    output: Option<PathBuf>,

    /// pixel format to deliver frames in (i420, rgb565le, bgr32). Default: i420
    #[argh(option, default = "OutputFormat::I420")]
    output_format: OutputFormat,

    /// use bilinear chroma interpolation when converting to RGB
    #[argh(switch)]
    bilinear: bool,

    /// whether to display the MD5 of the decoded stream, and at which granularity (stream or
    /// frame)
    #[argh(option)]
    compute_md5: Option<Md5Computation>,
}

fn main() {
    env_logger::init();

    let args: Args = argh::from_env();

    let input = {
        let mut buf = Vec::new();
        File::open(&args.input)
            .expect("error opening input file")
            .read_to_end(&mut buf)
            .expect("error reading input file");
        buf
    };

    let mut output = args
        .output
        .as_ref()
        .map(|p| File::create(p).expect("error creating output file"));

    let filter = if args.bilinear {
        ScaleFilter::Bilinear
    } else {
        ScaleFilter::FastBilinear
    };
    let config = SessionConfig::new(args.output_format).with_scale_filter(filter);
    let mut session = DecoderSession::<OpenH264Engine, SoftwareScalerFactory>::open(config)
        .expect("failed to create decoder session");

    let mut md5_context = md5::Context::new();
    let mut frame_data = Vec::new();
    let mut num_frames = 0;

    let mut on_new_frame = |session: &mut DecoderSession<_, _>| {
        frame_data.resize(session.output_byte_size(), 0);
        let pts = session
            .deliver(&mut frame_data)
            .expect("failed to deliver frame");
        num_frames += 1;
        log::debug!("frame {} delivered with pts {:?}", num_frames, pts);

        if let Some(output) = &mut output {
            output
                .write_all(&frame_data)
                .expect("failed to write to output file");
        }

        match args.compute_md5 {
            None => (),
            Some(Md5Computation::Frame) => println!("{:x}", md5::compute(&frame_data)),
            Some(Md5Computation::Stream) => md5_context.consume(&frame_data),
        }
    };

    for (pts, nalu) in H264NalIterator::new(&input).enumerate() {
        if let Err(e) = session.submit_slice(nalu.with_start_code(), Some(pts as i64)) {
            log::warn!("NAL unit {} ({:?}): {:#}", pts, nalu.header().type_, e);
            continue;
        }

        if session.is_frame_ready() {
            on_new_frame(&mut session);
        }
    }

    loop {
        if let Err(e) = session.flush() {
            log::warn!("flush failed: {:#}", e);
            break;
        }
        if !session.is_frame_ready() {
            break;
        }
        on_new_frame(&mut session);
    }

    session.destroy();

    if let Some(Md5Computation::Stream) = args.compute_md5 {
        println!("{:x}", md5_context.compute());
    }
}
