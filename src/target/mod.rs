//! Target-process model: the narrow interfaces this core consumes.
//!
//! The materialization core never talks to a live debug session directly. It
//! sees the process under observation through four small boundaries:
//!
//! - [`MemoryMap`] - allocate, free, read, and write byte ranges in the
//!   target's address space
//! - [`StackFrameProvider`] - resolve a captured (thread, stack-activation)
//!   identity to a currently valid [`StackFrame`], or report that it is gone
//! - [`RegisterContext`] - read and write register contents by descriptor
//! - [`Symbol`] - an already-resolved symbol address
//!
//! Each boundary ships with a simulated implementation ([`ProcessMemory`],
//! [`FrameTable`], [`RegisterBank`]) so sessions can be exercised end-to-end
//! against a fake halted process.

mod frame;
mod memory;
mod registers;
mod symbol;

pub use frame::{FrameTable, StackExtent, StackFrame, StackFrameProvider, StackId, ThreadId};
pub use memory::{MemoryMap, MemoryMapRef, ProcessMemory};
pub use registers::{RegisterBank, RegisterContext, RegisterContextRef, RegisterInfo};
pub use symbol::Symbol;
