#![no_main]

use h264_bridge::backend::dummy::DummyEngine;
use h264_bridge::backend::software::SoftwareScalerFactory;
use h264_bridge::nalu::H264NalIterator;
use h264_bridge::session::DecoderSession;
use h264_bridge::session::SessionConfig;
use h264_bridge::OutputFormat;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First byte selects the output format, the rest is the stream.
    let Some((&selector, stream)) = data.split_first() else {
        return;
    };
    let format = match selector % 3 {
        0 => OutputFormat::I420,
        1 => OutputFormat::RGB565LE,
        _ => OutputFormat::BGR32,
    };

    let mut session =
        DecoderSession::<DummyEngine, SoftwareScalerFactory>::open(SessionConfig::new(format))
            .unwrap();
    let mut out = Vec::new();

    for (pts, nalu) in H264NalIterator::new(stream).enumerate() {
        let _ = session.submit_slice(nalu.with_start_code(), Some(pts as i64));
        if session.is_frame_ready() {
            out.resize(session.output_byte_size(), 0);
            session.deliver(&mut out).unwrap();
        }
    }

    while session.flush().is_ok() && session.is_frame_ready() {
        out.resize(session.output_byte_size(), 0);
        session.deliver(&mut out).unwrap();
    }
});
