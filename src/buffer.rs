// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Caller-owned memory handed to a session for the duration of one call.
//!
//! Sessions never keep a reference to these buffers past the call they are passed to. A buffer
//! may fail to resolve to an address (e.g. a foreign buffer object that is not backed by direct
//! memory), in which case the call reports an invalid buffer without touching any state.

use std::marker::PhantomData;

use bytes::Bytes;
use bytes::BytesMut;

/// Memory a session reads compressed data from.
pub trait InputBuffer {
    /// Returns the memory backing this buffer, or `None` if it cannot be resolved.
    fn resolve(&self) -> Option<&[u8]>;
}

/// Memory a session writes a delivered picture to.
pub trait OutputBuffer {
    /// Returns the memory backing this buffer, or `None` if it cannot be resolved. The length of
    /// the returned slice is the capacity of the buffer.
    fn resolve_mut(&mut self) -> Option<&mut [u8]>;
}

impl<T: InputBuffer + ?Sized> InputBuffer for &T {
    fn resolve(&self) -> Option<&[u8]> {
        (**self).resolve()
    }
}

impl InputBuffer for [u8] {
    fn resolve(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl<const N: usize> InputBuffer for [u8; N] {
    fn resolve(&self) -> Option<&[u8]> {
        Some(&self[..])
    }
}

impl InputBuffer for Vec<u8> {
    fn resolve(&self) -> Option<&[u8]> {
        Some(&self[..])
    }
}

impl InputBuffer for Bytes {
    fn resolve(&self) -> Option<&[u8]> {
        Some(&self[..])
    }
}

impl InputBuffer for BytesMut {
    fn resolve(&self) -> Option<&[u8]> {
        Some(&self[..])
    }
}

impl OutputBuffer for [u8] {
    fn resolve_mut(&mut self) -> Option<&mut [u8]> {
        Some(self)
    }
}

impl<const N: usize> OutputBuffer for [u8; N] {
    fn resolve_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self[..])
    }
}

impl OutputBuffer for Vec<u8> {
    fn resolve_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self[..])
    }
}

impl OutputBuffer for BytesMut {
    fn resolve_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self[..])
    }
}

/// A read-only view of foreign memory given as an address and a capacity.
///
/// A null address does not resolve.
#[derive(Debug, Clone, Copy)]
pub struct DirectBuffer<'a> {
    ptr: *const u8,
    capacity: usize,
    _memory: PhantomData<&'a [u8]>,
}

impl<'a> DirectBuffer<'a> {
    /// # Safety
    ///
    /// If `ptr` is not null, it must point to `capacity` initialized bytes that remain valid and
    /// are not written to for `'a`.
    pub unsafe fn from_raw_parts(ptr: *const u8, capacity: usize) -> Self {
        Self {
            ptr,
            capacity,
            _memory: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<'a> InputBuffer for DirectBuffer<'a> {
    fn resolve(&self) -> Option<&[u8]> {
        if self.ptr.is_null() {
            return None;
        }

        // SAFETY: guaranteed by the contract of `from_raw_parts`.
        Some(unsafe { std::slice::from_raw_parts(self.ptr, self.capacity) })
    }
}

/// A writable view of foreign memory given as an address and a capacity.
///
/// A null address does not resolve.
#[derive(Debug)]
pub struct DirectBufferMut<'a> {
    ptr: *mut u8,
    capacity: usize,
    _memory: PhantomData<&'a mut [u8]>,
}

impl<'a> DirectBufferMut<'a> {
    /// # Safety
    ///
    /// If `ptr` is not null, it must point to `capacity` initialized bytes that remain valid and
    /// are not accessed through any other pointer for `'a`.
    pub unsafe fn from_raw_parts(ptr: *mut u8, capacity: usize) -> Self {
        Self {
            ptr,
            capacity,
            _memory: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<'a> OutputBuffer for DirectBufferMut<'a> {
    fn resolve_mut(&mut self) -> Option<&mut [u8]> {
        if self.ptr.is_null() {
            return None;
        }

        // SAFETY: guaranteed by the contract of `from_raw_parts`.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr, self.capacity) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_buffers_resolve() {
        let data = vec![1u8, 2, 3];
        assert_eq!(data.resolve(), Some(&[1u8, 2, 3][..]));
        assert_eq!(Bytes::from_static(b"abc").resolve(), Some(&b"abc"[..]));

        let mut out = [0u8; 4];
        assert_eq!(out.resolve_mut().map(|m| m.len()), Some(4));

        let mut out = BytesMut::from(&[0u8; 8][..]);
        assert_eq!(out.resolve_mut().map(|m| m.len()), Some(8));
    }

    #[test]
    fn null_direct_buffers_do_not_resolve() {
        let input = unsafe { DirectBuffer::from_raw_parts(std::ptr::null(), 16) };
        assert!(input.resolve().is_none());
        assert_eq!(input.capacity(), 16);

        let mut output = unsafe { DirectBufferMut::from_raw_parts(std::ptr::null_mut(), 16) };
        assert!(output.resolve_mut().is_none());
    }

    #[test]
    fn direct_buffers_map_memory() {
        let mut memory = vec![0u8; 6];

        {
            let mut output =
                unsafe { DirectBufferMut::from_raw_parts(memory.as_mut_ptr(), memory.len()) };
            output.resolve_mut().unwrap()[2] = 7;
        }

        let input = unsafe { DirectBuffer::from_raw_parts(memory.as_ptr(), 3) };
        assert_eq!(input.resolve(), Some(&[0u8, 0, 7][..]));
    }
}
