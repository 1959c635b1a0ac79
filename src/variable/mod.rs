//! Debugger-side representations of the values moved through staged memory.
//!
//! Two families of values flow through a materialized struct:
//!
//! - [`Variable`] - a local of the program being debugged, whose live value
//!   sits in debugger memory ([`ValueLocation::Host`]), at an absolute target
//!   address ([`ValueLocation::Target`]), or at a frame-relative offset
//!   ([`ValueLocation::FrameRelative`])
//! - [`ExpressionVariable`] - a named value owned by the debugger itself that
//!   outlives a single evaluation: the `$foo` persistent variables and the
//!   result of each expression
//!
//! Both are shared as `Arc<RwLock<_>>` handles ([`VariableRef`],
//! [`ExpressionVariableRef`]) because the evaluation driver, the variable
//! store, and staged entities all hold them concurrently within one
//! single-threaded session.
//!
//! [`PersistentVariableDelegate`] is the narrow boundary to the persistent
//! variable store: it allocates names for fresh result values and is notified
//! when a value has been dematerialized.

use std::sync::{Arc, RwLock};

use bitflags::bitflags;

/// Shared handle to a local [`Variable`].
pub type VariableRef = Arc<RwLock<Variable>>;

/// Shared handle to an [`ExpressionVariable`].
pub type ExpressionVariableRef = Arc<RwLock<ExpressionVariable>>;

/// Minimal type model: the size and alignment a value occupies in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueType {
    byte_size: u64,
    byte_alignment: u64,
}

impl ValueType {
    /// Creates a type of the given size and alignment in bytes.
    #[must_use]
    pub fn new(byte_size: u64, byte_alignment: u64) -> Self {
        ValueType {
            byte_size,
            byte_alignment,
        }
    }

    /// The value's size in bytes.
    #[must_use]
    pub fn byte_size(self) -> u64 {
        self.byte_size
    }

    /// The value's alignment in bytes.
    #[must_use]
    pub fn byte_alignment(self) -> u64 {
        self.byte_alignment
    }
}

/// Where a local variable's live value resides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueLocation {
    /// In the debugger's own memory, in the variable's byte buffer.
    Host,
    /// At an absolute address in the target process.
    Target(u64),
    /// At a signed offset from the originating frame's base address.
    ///
    /// The only location that needs a live frame to resolve, and the only one
    /// subject to the stack-extent check on write-back.
    FrameRelative(i64),
}

/// A local variable of the program being debugged.
///
/// The staged entity copies the variable's live value into its span at
/// materialization time and back out at dematerialization time. For
/// [`ValueLocation::Host`] the byte buffer is the live value; for the other
/// locations it is unused and target memory is authoritative.
#[derive(Clone, Debug)]
pub struct Variable {
    name: String,
    ty: ValueType,
    location: ValueLocation,
    bytes: Vec<u8>,
}

impl Variable {
    /// Creates a host-resident variable and returns a shared handle to it.
    ///
    /// `bytes` is the live value; it must be `ty.byte_size()` long, which the
    /// layout engine checks at add time.
    #[must_use]
    pub fn with_host_value(name: &str, ty: ValueType, bytes: Vec<u8>) -> VariableRef {
        Arc::new(RwLock::new(Variable {
            name: name.to_string(),
            ty,
            location: ValueLocation::Host,
            bytes,
        }))
    }

    /// Creates a variable living at an absolute target address.
    #[must_use]
    pub fn at_target_address(name: &str, ty: ValueType, address: u64) -> VariableRef {
        Arc::new(RwLock::new(Variable {
            name: name.to_string(),
            ty,
            location: ValueLocation::Target(address),
            bytes: Vec::new(),
        }))
    }

    /// Creates a variable living at a frame-relative offset.
    #[must_use]
    pub fn at_frame_offset(name: &str, ty: ValueType, offset: i64) -> VariableRef {
        Arc::new(RwLock::new(Variable {
            name: name.to_string(),
            ty,
            location: ValueLocation::FrameRelative(offset),
            bytes: Vec::new(),
        }))
    }

    /// The variable's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The variable's type.
    #[must_use]
    pub fn ty(&self) -> ValueType {
        self.ty
    }

    /// Where the live value resides.
    #[must_use]
    pub fn location(&self) -> ValueLocation {
        self.location
    }

    /// The host-side byte buffer.
    ///
    /// The live value for [`ValueLocation::Host`] variables; unused otherwise.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replaces the host-side byte buffer.
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
    }
}

bitflags! {
    /// Properties of an [`ExpressionVariable`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VariableFlags: u32 {
        /// The value keeps a live allocation in the target between evaluations.
        const KEEP_IN_MEMORY = 1 << 0;
        /// The value is an lvalue: assignments through it are meaningful.
        const IS_LVALUE = 1 << 1;
        /// The value is the result of an expression evaluation.
        const IS_RESULT = 1 << 2;
    }
}

/// A named value owned by the debugger that outlives a single evaluation.
///
/// Persistent variables (`$foo`) and expression results both take this form.
/// The byte buffer holds the debugger's copy of the value; `live_address` is
/// set while the value also has a backing allocation in the target.
#[derive(Clone, Debug)]
pub struct ExpressionVariable {
    name: String,
    ty: ValueType,
    flags: VariableFlags,
    bytes: Vec<u8>,
    live_address: Option<u64>,
}

impl ExpressionVariable {
    /// Creates a persistent value and returns a shared handle to it.
    #[must_use]
    pub fn new(
        name: &str,
        ty: ValueType,
        flags: VariableFlags,
        bytes: Vec<u8>,
    ) -> ExpressionVariableRef {
        Arc::new(RwLock::new(ExpressionVariable {
            name: name.to_string(),
            ty,
            flags,
            bytes,
            live_address: None,
        }))
    }

    /// The variable's name, such as `$answer` or `$__result`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The variable's type.
    #[must_use]
    pub fn ty(&self) -> ValueType {
        self.ty
    }

    /// The variable's property flags.
    #[must_use]
    pub fn flags(&self) -> VariableFlags {
        self.flags
    }

    /// Sets or clears property flags.
    pub fn set_flags(&mut self, flags: VariableFlags) {
        self.flags = flags;
    }

    /// The debugger's copy of the value.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replaces the debugger's copy of the value.
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
    }

    /// The value's backing allocation in the target, if it has one.
    #[must_use]
    pub fn live_address(&self) -> Option<u64> {
        self.live_address
    }

    /// Records or clears the value's backing allocation in the target.
    pub fn set_live_address(&mut self, address: Option<u64>) {
        self.live_address = address;
    }

    /// Creates an [`ExpressionVariable`] directly (not behind a handle).
    ///
    /// Used by stores and tests that wrap the value themselves.
    #[must_use]
    pub fn unshared(name: &str, ty: ValueType, flags: VariableFlags, bytes: Vec<u8>) -> Self {
        ExpressionVariable {
            name: name.to_string(),
            ty,
            flags,
            bytes,
            live_address: None,
        }
    }
}

/// Boundary to the persistent/result variable store.
///
/// Implemented by whoever owns persistent variables across evaluations. The
/// core asks it to name a fresh result value and notifies it once a value has
/// been dematerialized and is ready for use.
pub trait PersistentVariableDelegate {
    /// Allocates the name for a new persistent/result value, such as `$3`.
    fn allocate_name(&self) -> String;

    /// Called when `variable` has been fully dematerialized.
    fn did_dematerialize(&self, variable: &ExpressionVariableRef);
}
