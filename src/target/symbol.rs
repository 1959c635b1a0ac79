//! Resolved symbol descriptors.
//!
//! Symbol lookup itself is out of scope; by the time a symbol reaches the
//! layout it has already been resolved to an address by the debugger's symbol
//! machinery. The entity stages that address as a pointer slot so injected
//! code can reach the symbol's storage.

/// A symbol already resolved to a target-process address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    name: String,
    address: u64,
}

impl Symbol {
    /// Creates a resolved symbol.
    ///
    /// An address of `0` marks an unresolved symbol; the layout engine
    /// rejects those at add time.
    #[must_use]
    pub fn new(name: &str, address: u64) -> Self {
        Symbol {
            name: name.to_string(),
            address,
        }
    }

    /// The symbol's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The symbol's resolved address.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }
}
