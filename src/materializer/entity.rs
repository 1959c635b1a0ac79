//! Staged entities: the units of state moved through the materialized struct.
//!
//! An [`Entity`] is one member of the struct the materializer lays out. Each
//! of the five kinds knows how to copy its live value into its span at
//! materialization time, back out at dematerialization time, and how to undo
//! any session-scoped bookkeeping when the session is abandoned.
//!
//! Span models differ by kind:
//!
//! - **Local** and **Register** entities stage their value bytes directly;
//!   the span is exactly the value
//! - **Persistent**, **Result**, and **Symbol** entities stage a pointer slot
//!   referring to target-side storage, so injected code indirects to reach
//!   the actual value

use std::sync::Arc;

use strum::Display;
use tracing::{debug, warn};

use crate::{
    target::{MemoryMapRef, RegisterContextRef, RegisterInfo, StackExtent, StackFrame, Symbol},
    variable::{
        ExpressionVariable, ExpressionVariableRef, PersistentVariableDelegate, ValueLocation,
        ValueType, VariableFlags, VariableRef,
    },
    Error, Result,
};

/// Size of a pointer slot in the materialized struct.
///
/// Slots are 8 bytes regardless of the target's pointer width; narrower
/// targets use the low-order bytes.
pub(crate) const POINTER_SIZE: u64 = 8;

/// Alignment of a pointer slot in the materialized struct.
pub(crate) const POINTER_ALIGNMENT: u64 = 8;

/// Name given to a dematerialized result when no delegate provides one.
const DEFAULT_RESULT_NAME: &str = "$__result";

/// The kind-specific payload of a staged entity.
#[derive(Display)]
pub(crate) enum EntityKind {
    /// A local variable of the program being debugged.
    Local {
        /// The variable whose live value moves through the span.
        variable: VariableRef,
    },

    /// A pre-existing persistent variable owned by the debugger.
    Persistent {
        /// The persistent value being staged.
        variable: ExpressionVariableRef,
        /// Notified once the value has been dematerialized.
        delegate: Option<Arc<dyn PersistentVariableDelegate>>,
        /// Whether this session created the variable's backing allocation.
        allocated_here: bool,
    },

    /// The result slot of the expression being evaluated.
    Result {
        /// Type of the value the injected code will produce.
        ty: ValueType,
        /// Whether the result is an lvalue.
        is_lvalue: bool,
        /// Whether the result keeps its target allocation after the session.
        keep_in_memory: bool,
        /// Names the fresh value and observes its completion.
        delegate: Option<Arc<dyn PersistentVariableDelegate>>,
        /// The scratch allocation holding the result during the session.
        allocation: Option<u64>,
    },

    /// A symbol already resolved to a target address.
    Symbol {
        /// The resolved symbol.
        symbol: Symbol,
    },

    /// A register of the halted thread.
    Register {
        /// Descriptor of the register.
        info: RegisterInfo,
        /// Context the contents are read from and written back to.
        context: RegisterContextRef,
    },
}

/// One member of the materialized struct.
///
/// Owns its layout bookkeeping (alignment, size, offset) and its
/// kind-specific payload. Offsets are assigned exactly once by the layout
/// engine and never change afterwards.
pub(crate) struct Entity {
    alignment: u64,
    size: u64,
    offset: u64,
    kind: EntityKind,
}

impl Entity {
    /// Creates an entity with offset `0`; the layout engine assigns the real one.
    pub(crate) fn new(kind: EntityKind, size: u64, alignment: u64) -> Self {
        Entity {
            alignment,
            size,
            offset: 0,
            kind,
        }
    }

    pub(crate) fn alignment(&self) -> u64 {
        self.alignment
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Copies the entity's current live value into its span.
    ///
    /// `frame` may be absent; only frame-relative locals require it.
    pub(crate) fn materialize(
        &mut self,
        frame: Option<&StackFrame>,
        map: &MemoryMapRef,
        process_address: u64,
    ) -> Result<()> {
        let span = process_address + self.offset;
        let size = self.size;

        match &mut self.kind {
            EntityKind::Local { variable } => {
                let (location, host_bytes) = {
                    let guard = read_lock!(variable);
                    (guard.location(), guard.bytes().to_vec())
                };

                let bytes = match location {
                    ValueLocation::Host => host_bytes,
                    ValueLocation::Target(address) => read_lock!(map).read(address, size)?,
                    ValueLocation::FrameRelative(offset) => {
                        let frame = frame.ok_or(Error::StaleContext)?;
                        let address = frame_relative_address(frame, offset)?;
                        read_lock!(map).read(address, size)?
                    }
                };

                write_lock!(map).write(span, &bytes)
            }

            EntityKind::Persistent {
                variable,
                allocated_here,
                ..
            } => {
                let live = read_lock!(variable).live_address();
                let address = match live {
                    Some(address) => address,
                    None => {
                        let (ty, mut bytes) = {
                            let guard = read_lock!(variable);
                            (guard.ty(), guard.bytes().to_vec())
                        };
                        bytes.resize(ty.byte_size() as usize, 0);

                        let address =
                            write_lock!(map).allocate(ty.byte_size(), ty.byte_alignment())?;
                        write_lock!(map).write(address, &bytes)?;
                        write_lock!(variable).set_live_address(Some(address));
                        *allocated_here = true;
                        address
                    }
                };

                write_lock!(map).write_pointer(span, address)
            }

            EntityKind::Result { ty, allocation, .. } => {
                // A superseded session's scratch has no other owner left to free it
                if let Some(previous) = allocation.take() {
                    if let Err(err) = write_lock!(map).deallocate(previous) {
                        warn!(address = previous, %err, "failed to release a superseded result scratch");
                    }
                }

                let address = write_lock!(map).allocate(ty.byte_size(), ty.byte_alignment())?;
                *allocation = Some(address);
                write_lock!(map).write_pointer(span, address)
            }

            EntityKind::Symbol { symbol } => write_lock!(map).write_pointer(span, symbol.address()),

            EntityKind::Register { info, context } => {
                let bytes = read_lock!(context).read_register(info)?;
                if bytes.len() as u64 != size {
                    return Err(Error::Register {
                        name: info.name().to_string(),
                        reason: format!(
                            "context produced {} bytes for a {}-byte register",
                            bytes.len(),
                            size
                        ),
                    });
                }
                write_lock!(map).write(span, &bytes)
            }
        }
    }

    /// Copies the value back from the span into its live destination.
    ///
    /// Frame-relative destinations outside `extent` are skipped with
    /// [`Error::StaleFrame`]; a missing frame skips them with
    /// [`Error::StaleContext`]. Both are recoverable, per-entity conditions.
    pub(crate) fn dematerialize(
        &mut self,
        frame: Option<&StackFrame>,
        map: &MemoryMapRef,
        process_address: u64,
        extent: Option<StackExtent>,
    ) -> Result<()> {
        let span = process_address + self.offset;
        let size = self.size;

        match &mut self.kind {
            EntityKind::Local { variable } => {
                let staged = read_lock!(map).read(span, size)?;
                let location = read_lock!(variable).location();

                match location {
                    ValueLocation::Host => {
                        write_lock!(variable).set_bytes(staged);
                        Ok(())
                    }
                    ValueLocation::Target(address) => write_lock!(map).write(address, &staged),
                    ValueLocation::FrameRelative(offset) => {
                        let frame = frame.ok_or(Error::StaleContext)?;
                        let address = frame_relative_address(frame, offset)?;
                        if let Some(extent) = extent {
                            if !extent.contains_span(address, size) {
                                return Err(Error::StaleFrame { address });
                            }
                        }
                        write_lock!(map).write(address, &staged)
                    }
                }
            }

            EntityKind::Persistent {
                variable,
                delegate,
                allocated_here,
            } => {
                let (name, ty, live) = {
                    let guard = read_lock!(variable);
                    (guard.name().to_string(), guard.ty(), guard.live_address())
                };
                let address = live.ok_or_else(|| {
                    layout_error!("persistent variable '{name}' has no backing allocation")
                })?;

                let bytes = read_lock!(map).read(address, ty.byte_size())?;
                let keep = read_lock!(variable)
                    .flags()
                    .contains(VariableFlags::KEEP_IN_MEMORY);

                write_lock!(variable).set_bytes(bytes);
                if !keep {
                    write_lock!(map).deallocate(address)?;
                    write_lock!(variable).set_live_address(None);
                }
                *allocated_here = false;

                if let Some(delegate) = delegate {
                    delegate.did_dematerialize(&*variable);
                }
                Ok(())
            }

            EntityKind::Result {
                ty,
                is_lvalue,
                keep_in_memory,
                delegate,
                allocation,
            } => {
                let address = allocation
                    .ok_or_else(|| layout_error!("result slot was never materialized"))?;
                let bytes = read_lock!(map).read(address, ty.byte_size())?;

                let name = delegate
                    .as_ref()
                    .map_or_else(|| DEFAULT_RESULT_NAME.to_string(), |d| d.allocate_name());

                let mut flags = VariableFlags::IS_RESULT;
                if *is_lvalue {
                    flags |= VariableFlags::IS_LVALUE;
                }
                if *keep_in_memory {
                    flags |= VariableFlags::KEEP_IN_MEMORY;
                }

                let variable = ExpressionVariable::new(&name, *ty, flags, bytes);
                if *keep_in_memory {
                    // Ownership of the allocation passes to the new variable
                    write_lock!(variable).set_live_address(Some(address));
                } else {
                    write_lock!(map).deallocate(address)?;
                }
                *allocation = None;

                if let Some(delegate) = delegate {
                    delegate.did_dematerialize(&variable);
                }
                Ok(())
            }

            // Nothing to write back for a symbol address
            EntityKind::Symbol { .. } => Ok(()),

            EntityKind::Register { info, context } => {
                let staged = read_lock!(map).read(span, size)?;
                write_lock!(context).write_register(info, &staged)
            }
        }
    }

    /// Releases session-scoped allocations and registrations.
    ///
    /// Used on abandonment; writes nothing back to any live destination.
    /// Never fails observably: cleanup problems are logged and swallowed.
    pub(crate) fn wipe(&mut self, map: &MemoryMapRef, _process_address: u64) {
        match &mut self.kind {
            EntityKind::Persistent {
                variable,
                allocated_here,
                ..
            } => {
                if *allocated_here {
                    if let Some(address) = read_lock!(variable).live_address() {
                        if let Err(err) = write_lock!(map).deallocate(address) {
                            warn!(address, %err, "failed to release persistent backing during wipe");
                        }
                    }
                    write_lock!(variable).set_live_address(None);
                    *allocated_here = false;
                }
            }

            EntityKind::Result { allocation, .. } => {
                if let Some(address) = allocation.take() {
                    if let Err(err) = write_lock!(map).deallocate(address) {
                        warn!(address, %err, "failed to release result scratch during wipe");
                    }
                }
            }

            EntityKind::Local { .. } | EntityKind::Symbol { .. } | EntityKind::Register { .. } => {}
        }
    }

    /// Logs the entity's span contents at debug level. Diagnostic only.
    pub(crate) fn dump_to_log(&self, map: &MemoryMapRef, process_address: u64) {
        let span = process_address + self.offset;
        match read_lock!(map).read(span, self.size) {
            Ok(bytes) => debug!(
                "{} entity at {:#x} (offset {}, size {}): {}",
                self.kind,
                span,
                self.offset,
                self.size,
                hex_dump(&bytes)
            ),
            Err(err) => debug!("{} entity at {:#x}: <unreadable: {}>", self.kind, span, err),
        }
    }
}

/// Resolves a frame-relative offset against a live frame's base address.
fn frame_relative_address(frame: &StackFrame, offset: i64) -> Result<u64> {
    frame
        .frame_base()
        .checked_add_signed(offset)
        .ok_or(Error::MemoryAccess {
            address: frame.frame_base(),
            reason: "frame-relative offset overflows the address space".to_string(),
        })
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, RwLock};

    use super::*;
    use crate::{
        target::{MemoryMap, ProcessMemory},
        variable::Variable,
    };

    fn test_map(capacity: usize) -> MemoryMapRef {
        Arc::new(RwLock::new(ProcessMemory::new(capacity)))
    }

    #[test]
    fn test_local_host_entity_round_trip() {
        let map = test_map(4096);
        let base = write_lock!(map).allocate(16, 8).unwrap();

        let variable =
            Variable::with_host_value("x", ValueType::new(4, 4), vec![0x11, 0x22, 0x33, 0x44]);
        let mut entity = Entity::new(
            EntityKind::Local {
                variable: variable.clone(),
            },
            4,
            4,
        );

        entity.materialize(None, &map, base).unwrap();
        assert_eq!(
            read_lock!(map).read(base, 4).unwrap(),
            [0x11, 0x22, 0x33, 0x44]
        );

        // Injected code overwrites the span
        write_lock!(map).write(base, &[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        entity.dematerialize(None, &map, base, None).unwrap();

        assert_eq!(variable.read().unwrap().bytes(), [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn test_symbol_entity_stages_address() {
        let map = test_map(4096);
        let base = write_lock!(map).allocate(8, 8).unwrap();

        let mut entity = Entity::new(
            EntityKind::Symbol {
                symbol: Symbol::new("g_flag", 0x11_2233),
            },
            POINTER_SIZE,
            POINTER_ALIGNMENT,
        );

        entity.materialize(None, &map, base).unwrap();
        assert_eq!(read_lock!(map).read_pointer(base).unwrap(), 0x11_2233);

        // Dematerializing a symbol writes nothing back
        entity.dematerialize(None, &map, base, None).unwrap();
    }

    #[test]
    fn test_result_wipe_releases_scratch() {
        let map = test_map(4096);
        let base = write_lock!(map).allocate(8, 8).unwrap();

        let mut entity = Entity::new(
            EntityKind::Result {
                ty: ValueType::new(8, 8),
                is_lvalue: false,
                keep_in_memory: false,
                delegate: None,
                allocation: None,
            },
            POINTER_SIZE,
            POINTER_ALIGNMENT,
        );

        entity.materialize(None, &map, base).unwrap();
        let scratch = read_lock!(map).read_pointer(base).unwrap();
        assert_ne!(scratch, 0);

        entity.wipe(&map, base);
        assert!(read_lock!(map).read(scratch, 1).is_err());

        // A second wipe has nothing left to release
        entity.wipe(&map, base);
    }

    #[test]
    fn test_frame_relative_entity_requires_frame() {
        let map = test_map(4096);
        let base = write_lock!(map).allocate(8, 8).unwrap();

        let variable = Variable::at_frame_offset("local", ValueType::new(8, 8), -8);
        let mut entity = Entity::new(EntityKind::Local { variable }, 8, 8);

        assert!(matches!(
            entity.materialize(None, &map, base),
            Err(Error::StaleContext)
        ));
    }
}
