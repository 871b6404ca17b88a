// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Engine implementations.
//!
//! A backend is a provider of H.264 decoding or of pixel format conversion, implementing the
//! traits of [`crate::engine`]. The dummy backend produces synthetic pictures and is meant for
//! testing sessions in isolation.

pub mod dummy;
#[cfg(feature = "openh264")]
pub mod openh264;
pub mod software;
