//! # procstage Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the procstage library. Import this module to get quick access to the essential
//! types for staging program state into a target process.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all procstage operations
pub use crate::Error;

/// The result type used throughout procstage
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Layout planner and staging orchestrator
pub use crate::Materializer;

/// Single-use session handle returned by a successful materialization
pub use crate::Dematerializer;

// ================================================================================================
// Target Process Model
// ================================================================================================

/// Byte-level access to the target process address space
pub use crate::target::{MemoryMap, MemoryMapRef, ProcessMemory};

/// Stack frame identity, resolution, and validity ranges
pub use crate::target::{FrameTable, StackExtent, StackFrame, StackFrameProvider, StackId, ThreadId};

/// Register descriptors and the register access boundary
pub use crate::target::{RegisterBank, RegisterContext, RegisterContextRef, RegisterInfo};

/// Resolved symbol descriptors
pub use crate::target::Symbol;

// ================================================================================================
// Staged Values
// ================================================================================================

/// Local variables and their live locations
pub use crate::variable::{ValueLocation, ValueType, Variable, VariableRef};

/// Persistent and result values that outlive a single evaluation
pub use crate::variable::{
    ExpressionVariable, ExpressionVariableRef, PersistentVariableDelegate, VariableFlags,
};
