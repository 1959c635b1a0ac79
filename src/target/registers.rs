//! Register descriptors and the register access boundary.
//!
//! Register entities are not frame-relative: their contents come from a
//! [`RegisterContext`] captured when the entity is added, so they stage and
//! unstage normally even when the originating frame is gone. [`RegisterBank`]
//! is the simulated context used by tests.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{Error, Result};

/// Shared handle to a register context.
pub type RegisterContextRef = Arc<RwLock<dyn RegisterContext>>;

/// Describes one register: its name and width in bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterInfo {
    name: String,
    byte_size: u64,
}

impl RegisterInfo {
    /// Creates a register descriptor.
    #[must_use]
    pub fn new(name: &str, byte_size: u64) -> Self {
        RegisterInfo {
            name: name.to_string(),
            byte_size,
        }
    }

    /// The register's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The register's width in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }
}

/// Reads and writes register contents by descriptor.
///
/// The boundary to the debugger's register machinery for one thread's
/// register state, captured while the target is halted.
pub trait RegisterContext {
    /// Reads the current contents of `info`, exactly `info.byte_size()` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Register`] if the register is unknown or unreadable.
    fn read_register(&self, info: &RegisterInfo) -> Result<Vec<u8>>;

    /// Replaces the contents of `info` with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Register`] if the register is unknown, unwritable, or
    /// `bytes` has the wrong width.
    fn write_register(&mut self, info: &RegisterInfo, bytes: &[u8]) -> Result<()>;
}

/// Simulated register context backed by a name-to-bytes table.
///
/// # Example
///
/// ```rust
/// use procstage::target::{RegisterBank, RegisterContext, RegisterInfo};
///
/// let mut bank = RegisterBank::new();
/// bank.set_register("rax", vec![0; 8]);
///
/// let info = RegisterInfo::new("rax", 8);
/// bank.write_register(&info, &42u64.to_le_bytes())?;
/// assert_eq!(bank.read_register(&info)?, 42u64.to_le_bytes());
/// # Ok::<(), procstage::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct RegisterBank {
    values: HashMap<String, Vec<u8>>,
}

impl RegisterBank {
    /// Creates an empty register bank.
    #[must_use]
    pub fn new() -> Self {
        RegisterBank {
            values: HashMap::new(),
        }
    }

    /// Defines a register and its current contents.
    pub fn set_register(&mut self, name: &str, bytes: Vec<u8>) {
        self.values.insert(name.to_string(), bytes);
    }

    /// Returns a register's current contents, if defined.
    #[must_use]
    pub fn register(&self, name: &str) -> Option<&[u8]> {
        self.values.get(name).map(Vec::as_slice)
    }
}

impl RegisterContext for RegisterBank {
    fn read_register(&self, info: &RegisterInfo) -> Result<Vec<u8>> {
        let bytes = self.values.get(info.name()).ok_or_else(|| Error::Register {
            name: info.name().to_string(),
            reason: "no such register".to_string(),
        })?;

        if bytes.len() as u64 != info.byte_size() {
            return Err(Error::Register {
                name: info.name().to_string(),
                reason: format!(
                    "descriptor width {} does not match contents of {} bytes",
                    info.byte_size(),
                    bytes.len()
                ),
            });
        }

        Ok(bytes.clone())
    }

    fn write_register(&mut self, info: &RegisterInfo, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 != info.byte_size() {
            return Err(Error::Register {
                name: info.name().to_string(),
                reason: format!(
                    "write of {} bytes into a {}-byte register",
                    bytes.len(),
                    info.byte_size()
                ),
            });
        }

        let slot = self.values.get_mut(info.name()).ok_or_else(|| Error::Register {
            name: info.name().to_string(),
            reason: "no such register".to_string(),
        })?;

        *slot = bytes.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_round_trip() {
        let mut bank = RegisterBank::new();
        bank.set_register("pc", vec![0; 8]);

        let info = RegisterInfo::new("pc", 8);
        bank.write_register(&info, &0x4010u64.to_le_bytes()).unwrap();

        assert_eq!(bank.read_register(&info).unwrap(), 0x4010u64.to_le_bytes());
    }

    #[test]
    fn test_unknown_register() {
        let bank = RegisterBank::new();
        let info = RegisterInfo::new("xmm0", 16);

        assert!(matches!(
            bank.read_register(&info),
            Err(Error::Register { .. })
        ));
    }

    #[test]
    fn test_width_mismatch() {
        let mut bank = RegisterBank::new();
        bank.set_register("al", vec![0]);

        // Descriptor wider than the stored contents
        let wide = RegisterInfo::new("al", 4);
        assert!(bank.read_register(&wide).is_err());

        // Write with the wrong number of bytes
        let info = RegisterInfo::new("al", 1);
        assert!(bank.write_register(&info, &[1, 2]).is_err());
    }
}
