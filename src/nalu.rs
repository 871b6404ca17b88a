// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Annex B H.264 NAL unit splitting.

use std::fmt::Debug;
use std::io::Cursor;

use anyhow::anyhow;
use anyhow::Result;
use bytes::Buf;
use enumn::N;

pub trait Header: Sized {
    /// Parse the NALU header, returning it.
    fn parse<T: AsRef<[u8]>>(cursor: &Cursor<T>) -> Result<Self>;
    /// Whether this header type indicates EOS.
    fn is_end(&self) -> bool;
    /// The length of the header.
    fn len(&self) -> usize;
}

#[derive(N, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    Unknown = 0,
    Slice = 1,
    SliceDpa = 2,
    SliceDpb = 3,
    SliceDpc = 4,
    SliceIdr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AuDelimiter = 9,
    SeqEnd = 10,
    StreamEnd = 11,
    FillerData = 12,
    SpsExt = 13,
    PrefixUnit = 14,
    SubsetSps = 15,
    DepthSps = 16,
    SliceAux = 19,
    SliceExt = 20,
    SliceDepth = 21,
}

impl NaluType {
    /// Whether NAL units of this type carry coded picture data.
    pub fn is_slice(self) -> bool {
        matches!(
            self,
            NaluType::Slice
                | NaluType::SliceDpa
                | NaluType::SliceDpb
                | NaluType::SliceDpc
                | NaluType::SliceIdr
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaluHeader {
    pub ref_idc: u8,
    pub type_: NaluType,
    pub idr_pic_flag: bool,
}

impl Header for NaluHeader {
    fn parse<T: AsRef<[u8]>>(cursor: &Cursor<T>) -> Result<Self> {
        if !cursor.has_remaining() {
            return Err(anyhow!("Broken Data"));
        }

        let byte = cursor.chunk()[0];
        if byte & 0x80 != 0 {
            return Err(anyhow!("forbidden_zero_bit is set"));
        }

        let type_ = NaluType::n(byte & 0x1f).ok_or(anyhow!("Broken Data"))?;
        let ref_idc = (byte & 0x60) >> 5;
        let idr_pic_flag = matches!(type_, NaluType::SliceIdr);

        Ok(NaluHeader {
            ref_idc,
            type_,
            idr_pic_flag,
        })
    }

    fn is_end(&self) -> bool {
        matches!(self.type_, NaluType::SeqEnd | NaluType::StreamEnd)
    }

    fn len(&self) -> usize {
        1
    }
}

#[derive(Debug)]
pub struct Nalu<'a, U> {
    header: U,
    /// The buffer that backs this NALU. Possibly shared with the other NALUs in the same
    /// stream.
    data: &'a [u8],

    size: usize,
    offset: usize,
    sc_offset: usize,
}

impl<'a, U> Nalu<'a, U>
where
    U: Debug + Header,
{
    fn find_start_code(data: &[u8], offset: usize) -> Option<usize> {
        // discard all zeroes until the start code pattern is found
        data.get(offset..)?
            .windows(3)
            .position(|window| window == [0x00, 0x00, 0x01])
    }

    /// Find the next Annex B encoded NAL unit.
    pub fn next(cursor: &mut Cursor<&'a [u8]>) -> Result<Nalu<'a, U>> {
        let bitstream = *cursor.get_ref();
        let pos = usize::try_from(cursor.position())?;

        // Find the start code for this NALU
        let current_nalu_offset =
            Self::find_start_code(bitstream, pos).ok_or(anyhow!("No NAL found"))?;

        let mut start_code_offset = pos + current_nalu_offset;

        // If the preceding byte is 00, then we actually have a four byte SC,
        // i.e. 00 00 00 01 Where the first 00 is the "zero_byte()"
        if start_code_offset > 0 && bitstream[start_code_offset - 1] == 00 {
            start_code_offset -= 1;
        }

        // The NALU offset is its offset + 3 bytes to skip the start code.
        let nalu_offset = pos + current_nalu_offset + 3;

        // Set the bitstream position to the start of the current NALU
        cursor.set_position(u64::try_from(nalu_offset)?);

        let hdr = U::parse(cursor)?;

        // Find the start of the subsequent NALU.
        let mut next_nalu_offset = match Self::find_start_code(bitstream, nalu_offset) {
            Some(offset) => offset,
            None => cursor.chunk().len(), // Whatever data is left must be part of the current NALU
        };

        while next_nalu_offset > 0 && bitstream[nalu_offset + next_nalu_offset - 1] == 00 {
            // Discard trailing_zero_8bits
            next_nalu_offset -= 1;
        }

        let nal_size = if hdr.is_end() {
            hdr.len()
        } else {
            next_nalu_offset
        };

        Ok(Nalu {
            header: hdr,
            data: bitstream,
            size: nal_size,
            offset: nalu_offset,
            sc_offset: start_code_offset,
        })
    }

    /// Get a reference to the nalu's header.
    pub fn header(&self) -> &U {
        &self.header
    }

    /// Get a reference to the nalu's size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get a reference to the nalu's offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Get a reference to the nalu's sc offset.
    pub fn sc_offset(&self) -> usize {
        self.sc_offset
    }

    /// Returns the NALU, start code included, as it appears in the stream.
    pub fn with_start_code(&self) -> &'a [u8] {
        &self.data[self.sc_offset..self.offset + self.size]
    }
}

impl<'a, U> AsRef<[u8]> for Nalu<'a, U> {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.size]
    }
}

/// Iterator over the NAL units of an Annex B stream. Iteration stops at the first NALU that
/// cannot be parsed.
pub struct NalIterator<'a, U>(Cursor<&'a [u8]>, std::marker::PhantomData<U>);

impl<'a, U> NalIterator<'a, U> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self(Cursor::new(stream), std::marker::PhantomData)
    }
}

impl<'a, U> Iterator for NalIterator<'a, U>
where
    U: Debug + Header,
{
    type Item = Nalu<'a, U>;

    fn next(&mut self) -> Option<Self::Item> {
        let nalu = Nalu::<U>::next(&mut self.0).ok()?;
        self.0.set_position((nalu.offset() + nalu.size()) as u64);

        Some(nalu)
    }
}

/// Convenience alias for iterating over H.264 NAL units.
pub type H264NalIterator<'a> = NalIterator<'a, NaluHeader>;

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x0a];
    const PPS: &[u8] = &[0x00, 0x00, 0x01, 0x68, 0xce, 0x3c, 0x80];
    const IDR: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, 0x00];

    #[test]
    fn split_stream() {
        let stream = [SPS, PPS, IDR].concat();
        let nalus: Vec<_> = H264NalIterator::new(&stream).collect();

        assert_eq!(nalus.len(), 3);

        assert_eq!(nalus[0].header().type_, NaluType::Sps);
        assert_eq!(nalus[0].header().ref_idc, 3);
        assert_eq!(nalus[0].sc_offset(), 0);
        assert_eq!(nalus[0].offset(), 4);
        assert_eq!(nalus[0].as_ref(), &SPS[4..]);
        assert_eq!(nalus[0].with_start_code(), SPS);

        assert_eq!(nalus[1].header().type_, NaluType::Pps);
        assert_eq!(nalus[1].with_start_code(), PPS);

        // Trailing zeroes are not part of the last NALU.
        assert_eq!(nalus[2].header().type_, NaluType::SliceIdr);
        assert!(nalus[2].header().idr_pic_flag);
        assert_eq!(nalus[2].as_ref(), &[0x65, 0x88, 0x84]);
    }

    #[test]
    fn no_start_code() {
        assert_eq!(H264NalIterator::new(&[0x65, 0x88, 0x84]).count(), 0);
        assert_eq!(H264NalIterator::new(&[]).count(), 0);
    }

    #[test]
    fn end_of_stream_nalu_is_one_byte() {
        let stream = [0x00, 0x00, 0x01, 0x0b, 0x00, 0x00, 0x01, 0x09, 0x10];
        let nalus: Vec<_> = H264NalIterator::new(&stream).collect();

        assert_eq!(nalus.len(), 2);
        assert!(nalus[0].header().is_end());
        assert_eq!(nalus[0].size(), 1);
        assert_eq!(nalus[1].header().type_, NaluType::AuDelimiter);
    }

    #[test]
    fn unparsable_header_stops_iteration() {
        let stream = [SPS, &[0x00, 0x00, 0x01, 0x91, 0x00], IDR].concat();

        assert_eq!(H264NalIterator::new(&stream).count(), 1);
    }

    #[test]
    fn slice_types() {
        assert!(NaluType::Slice.is_slice());
        assert!(NaluType::SliceIdr.is_slice());
        assert!(!NaluType::Sps.is_slice());
        assert!(!NaluType::Sei.is_slice());
    }
}
