//! Single-use session handles for staged memory.
//!
//! A [`Dematerializer`] is returned by every successful
//! [`Materializer::materialize`](crate::Materializer::materialize) call and
//! is the sole means to finish the session (write results back) or abandon
//! it (wipe). It never points at the originating frame: it captures the
//! frame's (thread, stack-activation) identity and re-resolves it at
//! dematerialization time, so a frame invalidated by injected code is
//! detected rather than dereferenced.
//!
//! Dropping a still-active handle runs [`Dematerializer::wipe`], which keeps
//! the session's bookkeeping released exactly once on every exit path.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock, Weak,
};

use tracing::trace;

use crate::{
    materializer::entity::Entity,
    target::{MemoryMapRef, StackExtent, StackFrame, StackFrameProvider, StackId, ThreadId},
    Error, Result,
};

/// Revocable marker tying a handle to its materializer's current session.
///
/// The materializer owns one token per session and revokes it when a newer
/// session replaces it; the handle holds a clone and checks revocation before
/// acting. Revocation is sticky.
pub(crate) struct SessionToken {
    revoked: AtomicBool,
}

impl SessionToken {
    pub(crate) fn new() -> Self {
        SessionToken {
            revoked: AtomicBool::new(false),
        }
    }

    pub(crate) fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    pub(crate) fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }
}

/// Single-use handle over one staged session.
///
/// States: **Active** (as returned) → **Finalized** (after
/// [`dematerialize`](Self::dematerialize) or [`wipe`](Self::wipe)), after
/// which the handle is permanently inert. A newer materialization revokes an
/// Active handle in place; [`is_valid`](Self::is_valid) then reports `false`
/// and [`dematerialize`](Self::dematerialize) refuses to run.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, RwLock};
/// use procstage::prelude::*;
///
/// let map: MemoryMapRef = Arc::new(RwLock::new(ProcessMemory::new(4096)));
/// let variable = Variable::with_host_value("x", ValueType::new(4, 4), vec![7, 0, 0, 0]);
///
/// let mut materializer = Materializer::new();
/// materializer.add_variable(variable)?;
///
/// let base = map
///     .write()
///     .unwrap()
///     .allocate(materializer.struct_byte_size(), materializer.struct_alignment())?;
/// let mut session = materializer.materialize(None, &map, base)?;
/// assert!(session.is_valid());
///
/// session.dematerialize(&FrameTable::new(), None)?;
/// assert!(!session.is_valid());
/// # Ok::<(), procstage::Error>(())
/// ```
pub struct Dematerializer {
    entities: Weak<RwLock<Vec<Entity>>>,
    token: Arc<SessionToken>,
    map: Option<MemoryMapRef>,
    thread: Option<ThreadId>,
    stack_id: Option<StackId>,
    process_address: u64,
    finalized: bool,
}

impl Dematerializer {
    pub(crate) fn new(
        entities: Weak<RwLock<Vec<Entity>>>,
        token: Arc<SessionToken>,
        map: MemoryMapRef,
        frame: Option<&StackFrame>,
        process_address: u64,
    ) -> Self {
        Dematerializer {
            entities,
            token,
            map: Some(map),
            thread: frame.map(StackFrame::thread),
            stack_id: frame.map(StackFrame::stack_id),
            process_address,
            finalized: false,
        }
    }

    /// Whether this handle still controls a live session.
    ///
    /// `true` only while the owning materializer and the memory map reference
    /// are set, no newer session has revoked this one, and the session has
    /// not yet been finalized.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.finalized
            && !self.token.is_revoked()
            && self.map.is_some()
            && self.entities.upgrade().is_some()
    }

    /// The base address the session's struct was staged at.
    #[must_use]
    pub fn process_address(&self) -> u64 {
        self.process_address
    }

    /// Finishes the session: copies every entity's value back to its live
    /// destination, in insertion order, best-effort.
    ///
    /// The originally captured (thread, stack-activation) identity is
    /// re-resolved through `frames`. When it no longer resolves (the thread
    /// exited, or injected code unwound past the originating frame),
    /// frame-relative entities are skipped with a recoverable
    /// [`Error::StaleContext`] while all others dematerialize normally.
    /// `extent`, when given, delimits the currently valid stack range;
    /// frame-relative destinations outside it are skipped with
    /// [`Error::StaleFrame`].
    ///
    /// The session transitions to Finalized regardless of per-entity
    /// failures. A second call on a finalized handle is a no-op `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSession`] if a newer session revoked this
    /// handle or the owning materializer is gone; otherwise the aggregate of
    /// all per-entity errors ([`Error::Partial`] when there are several).
    pub fn dematerialize(
        &mut self,
        frames: &dyn StackFrameProvider,
        extent: Option<StackExtent>,
    ) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if self.token.is_revoked() {
            self.finalized = true;
            self.map = None;
            return Err(Error::InvalidSession);
        }

        let (entities, map) = match (self.entities.upgrade(), self.map.clone()) {
            (Some(entities), Some(map)) => (entities, map),
            _ => {
                self.finalized = true;
                self.map = None;
                return Err(Error::InvalidSession);
            }
        };

        let frame = match (self.thread, self.stack_id) {
            (Some(thread), Some(stack_id)) => frames.resolve_frame(thread, stack_id),
            _ => None,
        };

        let mut errors = Vec::new();
        for entity in write_lock!(entities).iter_mut() {
            if let Err(err) = entity.dematerialize(
                frame.as_ref(),
                &map,
                self.process_address,
                extent,
            ) {
                errors.push(err);
            }
        }

        trace!(
            process_address = self.process_address,
            failures = errors.len(),
            "dematerialized session"
        );

        self.finalized = true;
        self.token.revoke();
        self.map = None;

        Error::aggregate(errors)
    }

    /// Abandons the session: releases every entity's session-scoped
    /// bookkeeping without writing anything back.
    ///
    /// Idempotent, callable from any point after materialization (including
    /// failure-handling paths), and defined never to fail observably:
    /// cleanup problems are logged and swallowed. A handle revoked by a newer
    /// session leaves the entities alone: their bookkeeping now belongs to
    /// that newer session.
    pub fn wipe(&mut self) {
        if self.finalized {
            return;
        }

        if !self.token.is_revoked() {
            if let (Some(entities), Some(map)) = (self.entities.upgrade(), self.map.as_ref()) {
                for entity in write_lock!(entities).iter_mut() {
                    entity.wipe(map, self.process_address);
                }
                trace!(process_address = self.process_address, "wiped session");
            }
        }

        self.finalized = true;
        self.token.revoke();
        self.map = None;
    }
}

impl Drop for Dematerializer {
    fn drop(&mut self) {
        self.wipe();
    }
}
