// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![deny(unsafe_code)]

//! # procstage
//!
//! Memory-materialization core for a debugger-embedded expression evaluator.
//! `procstage` stages heterogeneous pieces of program state (local variables,
//! persistent cross-evaluation values, result slots, symbols, and registers)
//! into one contiguous, aligned region of a target process so that dynamically
//! injected code can read and write them as ordinary memory, then copies the
//! results back out afterwards. It keeps working even when the stack frame
//! that originated the request is no longer a valid activation: the injected
//! code may have unwound or rewritten the stack in the meantime.
//!
//! ## Features
//!
//! - **Packed struct layout** - Offsets computed across disjoint, independently
//!   typed sources of state, respecting per-entity alignment
//! - **Five entity kinds** - Local variables, persistent variables, result
//!   slots, symbols, and registers, each knowing how to move its live value in
//!   and out of its span
//! - **Single-use sessions** - Every successful materialization returns exactly
//!   one [`Dematerializer`]; finishing or abandoning it releases the staged
//!   bookkeeping exactly once on every exit path
//! - **Staleness detection** - The originating execution context is tracked as
//!   a (thread, stack-activation) identity, never as a raw pointer, so unwound
//!   frames are detected instead of dereferenced
//! - **Best-effort error aggregation** - One failing entity never aborts a
//!   staging pass; every error is collected into a single reported result
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::{Arc, RwLock};
//! use procstage::prelude::*;
//!
//! // A simulated halted process and a register bank.
//! let map: MemoryMapRef = Arc::new(RwLock::new(ProcessMemory::new(1024 * 1024)));
//! let mut bank = RegisterBank::new();
//! bank.set_register("al", vec![0x2a]);
//! let registers: RegisterContextRef = Arc::new(RwLock::new(bank));
//!
//! // Build the layout: one 8-byte variable, one 1-byte register.
//! let variable = Variable::with_host_value(
//!     "counter",
//!     ValueType::new(8, 8),
//!     7u64.to_le_bytes().to_vec(),
//! );
//! let mut materializer = Materializer::new();
//! let var_offset = materializer.add_variable(variable.clone())?;
//! let reg_offset = materializer.add_register(RegisterInfo::new("al", 1), registers.clone())?;
//! assert_eq!((var_offset, reg_offset), (0, 8));
//!
//! // Allocate the struct in the target and stage everything into it.
//! let base = map.write().unwrap().allocate(
//!     materializer.struct_byte_size(),
//!     materializer.struct_alignment(),
//! )?;
//! let mut session = materializer.materialize(None, &map, base)?;
//!
//! // ... injected code runs here ...
//!
//! // Copy results back out.
//! session.dematerialize(&FrameTable::new(), None)?;
//! # Ok::<(), procstage::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`Materializer`] - append-only layout planner and staging orchestrator
//! - [`Dematerializer`] - single-use session handle; the only way to finish
//!   (write results back) or abandon (wipe) a staged session
//! - [`target`] - narrow interfaces to the process under observation: the
//!   memory map, stack frame resolution, registers, and symbols
//! - [`variable`] - the debugger-side representations of live and persistent
//!   values moved through staged memory
//!
//! ## Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// This module provides a curated selection of the most frequently used types
/// from across the procstage library, allowing for convenient glob imports.
///
/// # Example
///
/// ```rust
/// use procstage::prelude::*;
///
/// let mut materializer = Materializer::new();
/// assert_eq!(materializer.struct_alignment(), 1);
/// ```
pub mod prelude;

/// Narrow interfaces to the process under observation.
///
/// Everything the core consumes from the outside world lives here, specified
/// at its interface boundary:
///
/// - [`target::MemoryMap`] - allocate, free, read, and write target memory
/// - [`target::StackFrameProvider`] - resolve a captured (thread,
///   stack-activation) identity to a currently valid frame
/// - [`target::RegisterContext`] - read and write register contents
/// - [`target::Symbol`] - a resolved symbol address
///
/// Simulated implementations ([`target::ProcessMemory`],
/// [`target::FrameTable`], [`target::RegisterBank`]) make the core testable
/// without a live debug session.
pub mod target;

/// Debugger-side representations of the values moved through staged memory.
///
/// - [`variable::Variable`] - a local variable with a live location
/// - [`variable::ExpressionVariable`] - a named persistent/result value that
///   outlives a single evaluation
/// - [`variable::PersistentVariableDelegate`] - names new result values and
///   observes their completion
pub mod variable;

/// Layout engine, entity staging, and session handling.
///
/// The centerpiece of the crate: [`Materializer`] packs entities into a
/// struct layout and drives them in and out of target memory;
/// [`Dematerializer`] is the single-use handle that finishes or abandons one
/// staged session.
pub mod materializer;

/// The result type used throughout this library, centered around [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for all operations of this library.
pub use error::Error;

/// Layout planner and staging orchestrator.
pub use materializer::Materializer;

/// Single-use session handle returned by a successful materialization.
pub use materializer::Dematerializer;
