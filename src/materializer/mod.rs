//! Struct layout planning and staging orchestration.
//!
//! [`Materializer`] collects entities through the `add_*` operations,
//! assigning each a padded offset in a packed struct layout, then stages them
//! all into target memory with [`materialize`](Materializer::materialize).
//! The returned [`Dematerializer`] is the single-use handle over that
//! session.
//!
//! # Lifecycle
//!
//! 1. **Layout build** - repeated `add_*` calls; each returns the member's
//!    assigned offset. The collection is append-only and offsets are never
//!    reassigned.
//! 2. **Sizing** - [`struct_byte_size`](Materializer::struct_byte_size) and
//!    [`struct_alignment`](Materializer::struct_alignment) tell the caller
//!    what to allocate. The first materialization seals the layout; later
//!    `add_*` calls fail.
//! 3. **Staging** - [`materialize`](Materializer::materialize) copies every
//!    entity in, best-effort, and returns the session handle. At most one
//!    handle is valid at a time: a new materialization revokes the previous
//!    one.
//! 4. **Finish or abandon** - [`Dematerializer::dematerialize`] or
//!    [`Dematerializer::wipe`].

pub(crate) mod entity;

mod dematerializer;

pub use dematerializer::Dematerializer;

use std::sync::{Arc, RwLock, Weak};

use tracing::trace;

use crate::{
    materializer::{
        dematerializer::SessionToken,
        entity::{Entity, EntityKind, POINTER_ALIGNMENT, POINTER_SIZE},
    },
    target::{MemoryMapRef, RegisterContextRef, RegisterInfo, StackFrame, Symbol},
    variable::{
        ExpressionVariableRef, PersistentVariableDelegate, ValueLocation, ValueType, VariableRef,
    },
    Error, Result,
};

/// Layout planner and staging orchestrator.
///
/// Owns an append-only, insertion-ordered collection of staged entities,
/// computes the packed struct layout across them, and drives them in and out
/// of target memory. See the [module documentation](self) for the lifecycle.
///
/// # Example
///
/// ```rust
/// use procstage::{variable::{ValueType, Variable}, Materializer};
///
/// let mut materializer = Materializer::new();
/// let first = materializer.add_variable(Variable::with_host_value(
///     "a",
///     ValueType::new(8, 8),
///     vec![0; 8],
/// ))?;
/// let second = materializer.add_variable(Variable::with_host_value(
///     "b",
///     ValueType::new(2, 2),
///     vec![0; 2],
/// ))?;
///
/// assert_eq!((first, second), (0, 8));
/// assert_eq!(materializer.struct_byte_size(), 10);
/// assert_eq!(materializer.struct_alignment(), 8);
/// # Ok::<(), procstage::Error>(())
/// ```
pub struct Materializer {
    /// Staged entities in insertion order, shared with the session handle.
    entities: Arc<RwLock<Vec<Entity>>>,
    /// Running end of the layout, in bytes.
    current_offset: u64,
    /// Max of all entity alignments, at least 1.
    struct_alignment: u64,
    /// Token of the most recently issued session. The handle owns the
    /// strong reference; this record expires when the handle goes away.
    session: Option<Weak<SessionToken>>,
    /// Set by the first materialization; the layout is append-only until then.
    sealed: bool,
}

impl Materializer {
    /// Creates an empty materializer.
    #[must_use]
    pub fn new() -> Self {
        Materializer {
            entities: Arc::new(RwLock::new(Vec::new())),
            current_offset: 0,
            struct_alignment: 1,
            session: None,
            sealed: false,
        }
    }

    /// Adds a local variable; its span carries the value bytes directly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Layout`] if the variable's type is zero-sized, its
    /// alignment is not a power of two, a host-resident value has the wrong
    /// length, or the layout is already sealed.
    pub fn add_variable(&mut self, variable: VariableRef) -> Result<u64> {
        let (name, ty, location, host_len) = {
            let guard = read_lock!(variable);
            (
                guard.name().to_string(),
                guard.ty(),
                guard.location(),
                guard.bytes().len() as u64,
            )
        };

        if location == ValueLocation::Host && host_len != ty.byte_size() {
            return Err(layout_error!(
                "variable '{}' holds {} host bytes but its type is {} bytes",
                name,
                host_len,
                ty.byte_size()
            ));
        }

        self.add_struct_member(Entity::new(
            EntityKind::Local { variable },
            ty.byte_size(),
            ty.byte_alignment(),
        ))
    }

    /// Adds a pre-existing persistent variable; its span is a pointer slot to
    /// the variable's backing allocation in the target.
    ///
    /// `delegate`, when given, is notified once the value has been
    /// dematerialized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Layout`] if the variable's type cannot be staged or
    /// the layout is already sealed.
    pub fn add_persistent_variable(
        &mut self,
        variable: ExpressionVariableRef,
        delegate: Option<Arc<dyn PersistentVariableDelegate>>,
    ) -> Result<u64> {
        let (name, ty) = {
            let guard = read_lock!(variable);
            (guard.name().to_string(), guard.ty())
        };
        self.check_value_type(&name, ty)?;

        self.add_struct_member(Entity::new(
            EntityKind::Persistent {
                variable,
                delegate,
                allocated_here: false,
            },
            POINTER_SIZE,
            POINTER_ALIGNMENT,
        ))
    }

    /// Adds the result slot of the expression being evaluated; its span is a
    /// pointer slot to a scratch allocation the injected code fills in.
    ///
    /// At dematerialization time the scratch contents become a fresh
    /// [`ExpressionVariable`](crate::variable::ExpressionVariable) named by
    /// `delegate` (or `$__result` without one); `keep_in_memory` leaves the
    /// allocation alive as the new variable's backing storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Layout`] if `ty` cannot be staged or the layout is
    /// already sealed.
    pub fn add_result_variable(
        &mut self,
        ty: ValueType,
        is_lvalue: bool,
        keep_in_memory: bool,
        delegate: Option<Arc<dyn PersistentVariableDelegate>>,
    ) -> Result<u64> {
        self.check_value_type("the expression result", ty)?;

        self.add_struct_member(Entity::new(
            EntityKind::Result {
                ty,
                is_lvalue,
                keep_in_memory,
                delegate,
                allocation: None,
            },
            POINTER_SIZE,
            POINTER_ALIGNMENT,
        ))
    }

    /// Adds a resolved symbol; its span is a pointer slot holding the
    /// symbol's address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Layout`] if the symbol has no resolved address or the
    /// layout is already sealed.
    pub fn add_symbol(&mut self, symbol: Symbol) -> Result<u64> {
        if symbol.address() == 0 {
            return Err(layout_error!(
                "symbol '{}' has no resolved address",
                symbol.name()
            ));
        }

        self.add_struct_member(Entity::new(
            EntityKind::Symbol { symbol },
            POINTER_SIZE,
            POINTER_ALIGNMENT,
        ))
    }

    /// Adds a register; its span carries the register's raw bytes directly.
    ///
    /// The member alignment is the register width rounded up to a power of
    /// two, so exotic widths still produce a consistent layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Layout`] if the descriptor is zero-sized or the
    /// layout is already sealed.
    pub fn add_register(&mut self, info: RegisterInfo, context: RegisterContextRef) -> Result<u64> {
        if info.byte_size() == 0 {
            return Err(layout_error!("register '{}' has no size", info.name()));
        }

        let size = info.byte_size();
        let alignment = size.next_power_of_two();
        self.add_struct_member(Entity::new(
            EntityKind::Register { info, context },
            size,
            alignment,
        ))
    }

    /// The current end of the layout in bytes.
    ///
    /// This is the raw running offset, not rounded to the struct alignment;
    /// allocate with [`struct_alignment`](Self::struct_alignment) and any
    /// tail padding falls out of the allocator's granularity.
    #[must_use]
    pub fn struct_byte_size(&self) -> u64 {
        self.current_offset
    }

    /// The overall alignment of the struct: the max of all entity alignments,
    /// `1` while no entities have been added.
    #[must_use]
    pub fn struct_alignment(&self) -> u64 {
        self.struct_alignment
    }

    /// Number of entities added so far.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        read_lock!(self.entities).len()
    }

    /// Stages every entity into target memory at `process_address`, in
    /// insertion order, and returns the session handle.
    ///
    /// The pass is best-effort: a failing entity does not stop the ones after
    /// it, and every error is aggregated into the single returned result. On
    /// aggregate failure everything staged so far is wiped and no session is
    /// left outstanding. On success, any previously outstanding session
    /// handle is revoked (`is_valid()` turns `false` on it) and a fresh
    /// handle bound to `frame`'s (thread, stack-activation) identity is
    /// returned.
    ///
    /// `frame` may be `None` when no entity is frame-relative.
    ///
    /// # Errors
    ///
    /// The aggregate of all per-entity staging failures ([`Error::Partial`]
    /// when there are several).
    pub fn materialize(
        &mut self,
        frame: Option<&StackFrame>,
        map: &MemoryMapRef,
        process_address: u64,
    ) -> Result<Dematerializer> {
        self.sealed = true;

        if let Some(previous) = self.session.take().and_then(|token| token.upgrade()) {
            previous.revoke();
        }

        let mut errors = Vec::new();
        for entity in write_lock!(self.entities).iter_mut() {
            if let Err(err) = entity.materialize(frame, map, process_address) {
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            // Leave nothing half-staged behind a failed session
            for entity in write_lock!(self.entities).iter_mut() {
                entity.wipe(map, process_address);
            }
            Error::aggregate(errors)?;
        }

        trace!(
            process_address,
            entities = self.entity_count(),
            "materialized session"
        );

        let token = Arc::new(SessionToken::new());
        self.session = Some(Arc::downgrade(&token));

        Ok(Dematerializer::new(
            Arc::downgrade(&self.entities),
            token,
            Arc::clone(map),
            frame,
            process_address,
        ))
    }

    /// Logs every entity's span contents at debug level. Diagnostic only.
    pub fn dump_to_log(&self, map: &MemoryMapRef, process_address: u64) {
        for entity in read_lock!(self.entities).iter() {
            entity.dump_to_log(map, process_address);
        }
    }

    /// Shared offset/alignment bookkeeping behind every `add_*` operation.
    fn add_struct_member(&mut self, mut entity: Entity) -> Result<u64> {
        if self.sealed {
            return Err(layout_error!(
                "the layout is sealed; entities must be added before materialization"
            ));
        }

        let alignment = entity.alignment();
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(layout_error!(
                "entity alignment {} is not a power of two",
                alignment
            ));
        }
        if entity.size() == 0 {
            return Err(layout_error!("entity has no size"));
        }

        let offset = self
            .current_offset
            .checked_add(alignment - 1)
            .map(|padded| padded & !(alignment - 1))
            .ok_or_else(|| layout_error!("struct offset overflow"))?;

        entity.set_offset(offset);
        self.current_offset = offset
            .checked_add(entity.size())
            .ok_or_else(|| layout_error!("struct offset overflow"))?;
        self.struct_alignment = self.struct_alignment.max(alignment);

        write_lock!(self.entities).push(entity);
        Ok(offset)
    }

    /// Validates a type that backs a target-side allocation.
    fn check_value_type(&self, what: &str, ty: ValueType) -> Result<()> {
        if ty.byte_size() == 0 {
            return Err(layout_error!("{} has a zero-sized type", what));
        }
        if ty.byte_alignment() == 0 || !ty.byte_alignment().is_power_of_two() {
            return Err(layout_error!(
                "{} has alignment {} which is not a power of two",
                what,
                ty.byte_alignment()
            ));
        }
        Ok(())
    }
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new()
    }
}
