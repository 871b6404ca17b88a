// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Token-based access to decoder sessions.
//!
//! Integer-level callers do not hold sessions directly. [`SessionRegistry::init`] hands out a
//! [`SessionToken`] that is looked up on every subsequent call, so a stale or destroyed token is
//! reported as [`RegistryError::UnknownSession`] instead of reaching freed memory.
//!
//! Calls on a given session are serialized by a per-session lock, while calls on different
//! sessions run concurrently.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use log::debug;
use thiserror::Error;

use crate::buffer::InputBuffer;
use crate::buffer::OutputBuffer;
use crate::engine::DecodingEngine;
use crate::engine::ScalerFactory;
use crate::session::DecoderSession;
use crate::session::DeliverError;
use crate::session::Error;
use crate::session::SessionConfig;
use crate::session::INVALID_BUFFER_STATUS;
use crate::OutputFormat;
use crate::NO_PTS;

/// Opaque handle to a session of a [`SessionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(u64);

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("unknown session {0}")]
    UnknownSession(SessionToken),
    #[error("failed to create session")]
    Init(#[from] Error),
    #[error(transparent)]
    Deliver(#[from] DeliverError),
}

type SharedSession<E, S> = Arc<Mutex<DecoderSession<E, S>>>;

pub struct SessionRegistry<E, S>
where
    E: DecodingEngine,
    S: ScalerFactory,
{
    next_token: AtomicU64,
    sessions: Mutex<HashMap<SessionToken, SharedSession<E, S>>>,
}

impl<E, S> Default for SessionRegistry<E, S>
where
    E: DecodingEngine,
    S: ScalerFactory,
{
    fn default() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            sessions: Default::default(),
        }
    }
}

impl<E, S> SessionRegistry<E, S>
where
    E: DecodingEngine + 'static,
    S: ScalerFactory + Default,
{
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a session delivering pictures in the format of integer value `output_format`.
    pub fn init(&self, output_format: i32) -> Result<SessionToken, RegistryError> {
        let output_format = OutputFormat::try_from(output_format).map_err(|value| {
            Error::InvalidArgument(format!("unrecognized output format {}", value))
        })?;

        self.init_with_config(SessionConfig::new(output_format))
    }

    pub fn init_with_config(&self, config: SessionConfig) -> Result<SessionToken, RegistryError> {
        let session = DecoderSession::<E, S>::open(config)?;
        let token = SessionToken(self.next_token.fetch_add(1, Ordering::Relaxed));

        self.lock_sessions()
            .insert(token, Arc::new(Mutex::new(session)));
        debug!("Created {}", token);

        Ok(token)
    }
}

impl<E, S> SessionRegistry<E, S>
where
    E: DecodingEngine,
    S: ScalerFactory,
{
    fn lock_sessions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SessionToken, SharedSession<E, S>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the session of `token`, holding its lock but not the registry one.
    fn with_session<T>(
        &self,
        token: SessionToken,
        f: impl FnOnce(&mut DecoderSession<E, S>) -> T,
    ) -> Result<T, RegistryError> {
        let session = self
            .lock_sessions()
            .get(&token)
            .cloned()
            .ok_or(RegistryError::UnknownSession(token))?;

        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut session))
    }

    /// Destroys the session of `token`. If another thread is still using it, it is released when
    /// that call returns.
    pub fn destroy(&self, token: SessionToken) -> Result<(), RegistryError> {
        let session = self
            .lock_sessions()
            .remove(&token)
            .ok_or(RegistryError::UnknownSession(token))?;

        match Arc::try_unwrap(session) {
            Ok(session) => session
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .destroy(),
            Err(_) => debug!("{} still in use, release deferred", token),
        }
        debug!("Destroyed {}", token);

        Ok(())
    }

    /// Submits `length` bytes of `buffer` with timestamp `pts`, [`NO_PTS`] meaning none.
    ///
    /// Returns the status of the submission: the number of bytes consumed, or a negative code
    /// which is either the one reported by the engine or [`INVALID_BUFFER_STATUS`].
    pub fn submit(
        &self,
        token: SessionToken,
        buffer: Option<&dyn InputBuffer>,
        length: i32,
        pts: i64,
    ) -> Result<i32, RegistryError> {
        let pts = (pts != NO_PTS).then_some(pts);

        self.with_session(token, |session| {
            let Ok(length) = usize::try_from(length) else {
                return INVALID_BUFFER_STATUS;
            };

            match session.submit(buffer, length, pts) {
                Ok(consumed) => i32::try_from(consumed).unwrap_or(i32::MAX),
                Err(e) => e.code(),
            }
        })
    }

    pub fn is_frame_ready(&self, token: SessionToken) -> Result<bool, RegistryError> {
        self.with_session(token, |session| session.is_frame_ready())
    }

    pub fn width(&self, token: SessionToken) -> Result<u32, RegistryError> {
        self.with_session(token, |session| session.width())
    }

    pub fn height(&self, token: SessionToken) -> Result<u32, RegistryError> {
        self.with_session(token, |session| session.height())
    }

    pub fn output_byte_size(&self, token: SessionToken) -> Result<usize, RegistryError> {
        self.with_session(token, |session| session.output_byte_size())
    }

    /// Delivers the pending picture of `token` into `out`, returning its timestamp or [`NO_PTS`].
    pub fn deliver(
        &self,
        token: SessionToken,
        out: &mut dyn OutputBuffer,
    ) -> Result<i64, RegistryError> {
        let pts = self.with_session(token, |session| session.deliver(out))??;

        Ok(pts.unwrap_or(NO_PTS))
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::backend::dummy::DummyEngine;
    use crate::backend::software::SoftwareScalerFactory;
    use crate::buffer::DirectBuffer;
    use crate::engine::INVALID_DATA_STATUS;

    const SPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x0a];
    const IDR: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21];

    type Registry = SessionRegistry<DummyEngine, SoftwareScalerFactory>;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn unknown_output_format() {
        init_logging();
        let registry = Registry::new();

        assert!(matches!(
            registry.init(3),
            Err(RegistryError::Init(Error::InvalidArgument(_)))
        ));
        assert!(matches!(
            registry.init(-1),
            Err(RegistryError::Init(Error::InvalidArgument(_)))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn decode_and_deliver() {
        init_logging();
        let registry = Registry::new();
        let token = registry.init(OutputFormat::BGR32 as i32).unwrap();

        assert!(!registry.is_frame_ready(token).unwrap());
        assert_eq!(registry.output_byte_size(token).unwrap(), 0);

        let status = registry
            .submit(token, Some(&SPS), SPS.len() as i32, NO_PTS)
            .unwrap();
        assert_eq!(status, SPS.len() as i32);
        registry
            .submit(token, Some(&IDR), IDR.len() as i32, 42)
            .unwrap();
        assert!(registry.is_frame_ready(token).unwrap());
        assert_eq!(registry.width(token).unwrap(), 320);
        assert_eq!(registry.height(token).unwrap(), 200);

        let mut out = vec![0u8; registry.output_byte_size(token).unwrap()];
        assert_eq!(registry.deliver(token, &mut out).unwrap(), 42);
        assert!(matches!(
            registry.deliver(token, &mut out),
            Err(RegistryError::Deliver(DeliverError::NotReady))
        ));

        registry.destroy(token).unwrap();
    }

    #[test]
    fn missing_timestamp_round_trips() {
        init_logging();
        let registry = Registry::new();
        let token = registry.init(OutputFormat::I420 as i32).unwrap();

        let stream = [SPS, IDR].concat();
        registry
            .submit(token, Some(&stream), stream.len() as i32, NO_PTS)
            .unwrap();

        let mut out = vec![0u8; registry.output_byte_size(token).unwrap()];
        assert_eq!(registry.deliver(token, &mut out).unwrap(), NO_PTS);
    }

    #[test]
    fn submit_status_codes() {
        init_logging();
        let registry = Registry::new();
        let token = registry.init(OutputFormat::I420 as i32).unwrap();

        // Slice before any SPS.
        assert_eq!(
            registry
                .submit(token, Some(&IDR), IDR.len() as i32, 0)
                .unwrap(),
            INVALID_DATA_STATUS
        );

        let null = unsafe { DirectBuffer::from_raw_parts(std::ptr::null(), 8) };
        assert_eq!(
            registry.submit(token, Some(&null), 8, 0).unwrap(),
            INVALID_BUFFER_STATUS
        );
        assert_eq!(
            registry.submit(token, Some(&SPS), -1, 0).unwrap(),
            INVALID_BUFFER_STATUS
        );

        // Flushing an engine holding nothing back.
        assert_eq!(registry.submit(token, None, 0, NO_PTS).unwrap(), 0);
        assert!(!registry.is_frame_ready(token).unwrap());
    }

    #[test]
    fn destroyed_token_is_unknown() {
        init_logging();
        let registry = Registry::new();
        let token = registry.init(OutputFormat::RGB565LE as i32).unwrap();
        let other = registry.init(OutputFormat::RGB565LE as i32).unwrap();
        assert_ne!(token, other);
        assert_eq!(registry.len(), 2);

        registry.destroy(token).unwrap();

        assert!(matches!(
            registry.destroy(token),
            Err(RegistryError::UnknownSession(t)) if t == token
        ));
        assert!(matches!(
            registry.is_frame_ready(token),
            Err(RegistryError::UnknownSession(_))
        ));
        assert!(!registry.is_frame_ready(other).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sessions_run_concurrently() {
        init_logging();
        let registry = Registry::new();

        let crcs: Vec<u32> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let registry = &registry;
                    s.spawn(move || {
                        let token = registry.init(OutputFormat::RGB565LE as i32).unwrap();
                        let mut out = Vec::new();
                        let mut crc = crc32fast::Hasher::new();

                        registry
                            .submit(token, Some(&SPS), SPS.len() as i32, NO_PTS)
                            .unwrap();
                        for pts in 0..8 {
                            registry
                                .submit(token, Some(&IDR), IDR.len() as i32, i * 100 + pts)
                                .unwrap();
                            out.resize(registry.output_byte_size(token).unwrap(), 0);
                            assert_eq!(registry.deliver(token, &mut out).unwrap(), i * 100 + pts);
                            crc.update(&out);
                        }

                        registry.destroy(token).unwrap();
                        crc.finalize()
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // All sessions decoded the same stream.
        assert!(crcs.windows(2).all(|w| w[0] == w[1]));
        assert!(registry.is_empty());
    }
}
