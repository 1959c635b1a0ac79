//! Stack frame identity, resolution, and validity ranges.
//!
//! A materialized session must survive the frame that originated it being
//! unwound by injected code. The core therefore never keeps a frame pointer:
//! it captures a ([`ThreadId`], [`StackId`]) pair at materialization time and
//! re-resolves it through a [`StackFrameProvider`] when results are copied
//! back. Resolution failing is an expected, recoverable outcome.
//!
//! [`StackExtent`] delimits the currently valid stack address range during
//! dematerialization; frame-relative destinations outside it are skipped
//! rather than written, so reclaimed stack memory is never corrupted.

use std::collections::HashMap;

/// Identity of a thread in the target process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Creates a thread identity from the target's raw thread id.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        ThreadId(raw)
    }

    /// The raw thread id.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Identity of one specific call-frame instance.
///
/// Keyed on the frame's canonical frame address, which distinguishes this
/// activation from any later reuse of the same stack depth. Comparing stack
/// ids detects whether a previously captured frame is still meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StackId {
    frame_base: u64,
}

impl StackId {
    /// Creates a stack-activation identity from the frame's base address.
    #[must_use]
    pub fn new(frame_base: u64) -> Self {
        StackId { frame_base }
    }

    /// The canonical frame address of this activation.
    #[must_use]
    pub fn frame_base(self) -> u64 {
        self.frame_base
    }
}

/// The currently valid stack address range, `[bottom, top)`.
///
/// Stacks grow downward: `bottom` is the lowest live address (the innermost
/// frame's edge) and `top` the highest. A frame-relative destination outside
/// this range belongs to a reclaimed activation and must not be written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackExtent {
    /// Lowest currently valid stack address.
    pub bottom: u64,
    /// One past the highest currently valid stack address.
    pub top: u64,
}

impl StackExtent {
    /// Creates an extent covering `[bottom, top)`.
    #[must_use]
    pub fn new(bottom: u64, top: u64) -> Self {
        StackExtent { bottom, top }
    }

    /// Whether the `len`-byte span starting at `address` lies fully inside the extent.
    #[must_use]
    pub fn contains_span(&self, address: u64, len: u64) -> bool {
        address >= self.bottom && address.saturating_add(len) <= self.top
    }
}

/// A currently valid stack frame, resolved from a captured identity.
///
/// Carries just enough to anchor frame-relative values: the owning thread,
/// the activation identity, and through it the frame base address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    thread: ThreadId,
    stack_id: StackId,
}

impl StackFrame {
    /// Creates a frame for the given thread and activation.
    #[must_use]
    pub fn new(thread: ThreadId, stack_id: StackId) -> Self {
        StackFrame { thread, stack_id }
    }

    /// The thread this frame belongs to.
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// The activation identity of this frame.
    #[must_use]
    pub fn stack_id(&self) -> StackId {
        self.stack_id
    }

    /// The frame base address frame-relative locations resolve against.
    #[must_use]
    pub fn frame_base(&self) -> u64 {
        self.stack_id.frame_base()
    }
}

/// Resolves a captured (thread, stack-activation) identity to a live frame.
///
/// The boundary to the debugger's thread and unwind machinery. Returning
/// `None` means the activation is gone: the thread exited, or injected code
/// unwound past it. Callers treat that as a recoverable condition.
pub trait StackFrameProvider {
    /// Resolves `stack_id` on `thread` to a currently valid frame, if any.
    fn resolve_frame(&self, thread: ThreadId, stack_id: StackId) -> Option<StackFrame>;
}

/// Simulated frame provider backed by an explicit table.
///
/// Tests register the activations that are "live" and invalidate them to
/// model threads exiting or injected code unwinding the stack.
///
/// # Example
///
/// ```rust
/// use procstage::target::{FrameTable, StackFrame, StackFrameProvider, StackId, ThreadId};
///
/// let thread = ThreadId::new(1);
/// let stack_id = StackId::new(0x7000);
///
/// let mut frames = FrameTable::new();
/// frames.insert(StackFrame::new(thread, stack_id));
/// assert!(frames.resolve_frame(thread, stack_id).is_some());
///
/// frames.invalidate(thread, stack_id);
/// assert!(frames.resolve_frame(thread, stack_id).is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct FrameTable {
    frames: HashMap<(ThreadId, StackId), StackFrame>,
}

impl FrameTable {
    /// Creates an empty frame table.
    #[must_use]
    pub fn new() -> Self {
        FrameTable {
            frames: HashMap::new(),
        }
    }

    /// Registers a live activation.
    pub fn insert(&mut self, frame: StackFrame) {
        self.frames
            .insert((frame.thread(), frame.stack_id()), frame);
    }

    /// Removes one activation, as when injected code unwinds past it.
    pub fn invalidate(&mut self, thread: ThreadId, stack_id: StackId) {
        self.frames.remove(&(thread, stack_id));
    }

    /// Removes every activation of a thread, as when the thread exits.
    pub fn invalidate_thread(&mut self, thread: ThreadId) {
        self.frames.retain(|&(owner, _), _| owner != thread);
    }
}

impl StackFrameProvider for FrameTable {
    fn resolve_frame(&self, thread: ThreadId, stack_id: StackId) -> Option<StackFrame> {
        self.frames.get(&(thread, stack_id)).cloned()
    }
}
