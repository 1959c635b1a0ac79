use thiserror::Error;

macro_rules! layout_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Layout {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Layout {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers every failure mode of staging program state into a target process and
/// copying it back out. Entity-level failures during a staging or unstaging pass never abort
/// the pass; they are collected and surfaced as a single result (see [`Error::aggregate`]).
///
/// # Error Categories
///
/// ## Layout-build errors
/// - [`Error::Layout`] - An `add_*` request could not be turned into a struct member
///
/// ## Target address-space errors
/// - [`Error::MemoryAccess`] - A read or write through the memory map failed
/// - [`Error::Allocation`] - The memory map could not allocate a region
/// - [`Error::Register`] - A register context refused a read or write
///
/// ## Session errors
/// - [`Error::StaleContext`] - The captured thread/stack-activation is gone
/// - [`Error::StaleFrame`] - A frame-relative destination fell outside the live stack
/// - [`Error::InvalidSession`] - A revoked or detached session handle was used
/// - [`Error::Partial`] - Several entities failed within one pass
///
/// # Examples
///
/// ```rust
/// use procstage::{Error, Materializer};
///
/// let mut materializer = Materializer::new();
/// match materializer.add_symbol(procstage::target::Symbol::new("main", 0)) {
///     Err(Error::Layout { message, file, line }) => {
///         eprintln!("bad entity request: {} ({}:{})", message, file, line);
///     }
///     other => panic!("expected a layout error, got {:?}", other),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An `add_*` request could not be satisfied at layout-build time.
    ///
    /// Raised for entity requests the layout engine cannot represent: zero-sized
    /// values, non-power-of-two alignments, symbols without an address, additions
    /// after the layout has been sealed by a materialization, or offset overflow.
    /// The error includes the source location where the bad request was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was rejected
    /// * `file` - Source file in which the rejection was detected
    /// * `line` - Source line in which the rejection was detected
    #[error("Layout - {file}:{line}: {message}")]
    Layout {
        /// The message to be printed for the Layout error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A read or write through the memory map failed.
    ///
    /// The address was unreachable, unmapped, freed, or the access ran past the
    /// end of its region. Surfaced per entity and aggregated, never fatal to the
    /// surrounding pass.
    #[error("memory access at {address:#x} failed: {reason}")]
    MemoryAccess {
        /// The target-process address of the failed access
        address: u64,
        /// Why the access was refused
        reason: String,
    },

    /// The memory map could not allocate a region of the requested shape.
    #[error("allocation of {size} bytes (alignment {alignment}) failed: {reason}")]
    Allocation {
        /// Requested region size in bytes
        size: u64,
        /// Requested region alignment in bytes
        alignment: u64,
        /// Why the allocation was refused
        reason: String,
    },

    /// A register context refused to read or write a register.
    #[error("register '{name}' access failed: {reason}")]
    Register {
        /// Name of the register whose access failed
        name: String,
        /// Why the access was refused
        reason: String,
    },

    /// The captured execution context is no longer resolvable.
    ///
    /// The thread exited, or injected code unwound past the stack activation that
    /// originated the session. Frame-relative entities report this and skip their
    /// write-back; everything else proceeds normally.
    #[error("execution context is no longer resolvable")]
    StaleContext,

    /// A frame-relative destination fell outside the live stack range.
    ///
    /// The write-back was skipped to avoid corrupting reclaimed stack memory.
    /// This is a recoverable, per-entity condition.
    #[error("frame-relative destination {address:#x} is outside the live stack range")]
    StaleFrame {
        /// The skipped destination address
        address: u64,
    },

    /// A session handle was used after it was revoked or detached.
    ///
    /// A newer materialization invalidated this handle, or its owning
    /// materializer no longer exists.
    #[error("session handle is no longer valid")]
    InvalidSession,

    /// More than one entity failed within a single staging or unstaging pass.
    ///
    /// The pass ran to completion best-effort; every per-entity error is
    /// collected here in entity insertion order.
    #[error("partial failure: {} staged entities reported errors", .errors.len())]
    Partial {
        /// The per-entity errors, in entity insertion order
        errors: Vec<Error>,
    },
}

impl Error {
    /// Folds the errors collected during one best-effort pass into a single result.
    ///
    /// No errors is `Ok(())`, one error is returned as-is, and several become
    /// [`Error::Partial`] in collection order.
    pub fn aggregate(mut errors: Vec<Error>) -> crate::Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Partial { errors }),
        }
    }
}
