//! Memory map boundary and a simulated halted-process address space.
//!
//! [`MemoryMap`] is the only way the core touches target memory: allocating
//! the staged struct region, reading live values out of the debuggee, and
//! writing results back in. Accesses are synchronous and may fail; failures
//! surface as per-entity errors, never as a pass-wide abort.
//!
//! [`ProcessMemory`] is the in-crate simulation of that boundary: a region
//! table over a fake address space, with validity tracking for freed regions
//! and bounds-checked access. The target process is halted while the core
//! runs, so no concurrent mutation is modeled.
//!
//! # Address Space
//!
//! Each allocation gets a unique base address in a simulated address space
//! (starting at `0x7FFF_0000_0000`). These addresses don't correspond to real
//! process memory but provide consistent addressing for staged entities.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{Error, Result};

/// Shared handle to a memory map.
///
/// One `Arc<RwLock<_>>` handle is captured by the materializer session and
/// every entity operation against it.
pub type MemoryMapRef = Arc<RwLock<dyn MemoryMap>>;

/// Byte-level access to the target process address space.
///
/// The narrow boundary between the materialization core and whatever actually
/// backs the debuggee's memory: a live process, a core dump, or the simulated
/// [`ProcessMemory`]. All operations are synchronous; the target is halted
/// for the duration of any staging pass.
pub trait MemoryMap {
    /// Allocates a zeroed region of the given size and alignment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the region cannot be provided, for
    /// example because an address-space or capacity limit was reached.
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<u64>;

    /// Releases a region previously returned by [`allocate`](Self::allocate).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryAccess`] if `address` is not the base of a live
    /// allocation.
    fn deallocate(&mut self, address: u64) -> Result<()>;

    /// Reads `len` bytes starting at `address`.
    ///
    /// The address may point into the interior of an allocation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryAccess`] if the range is unmapped, freed, or
    /// runs past the end of its region.
    fn read(&self, address: u64, len: u64) -> Result<Vec<u8>>;

    /// Writes `bytes` starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryAccess`] if the range is unmapped, freed, or
    /// runs past the end of its region.
    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<()>;

    /// Size of a pointer in the target process, in bytes.
    fn address_byte_size(&self) -> u32;

    /// Reads a target-pointer-sized little-endian value at `address`.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the underlying [`read`](Self::read).
    fn read_pointer(&self, address: u64) -> Result<u64> {
        let bytes = self.read(address, u64::from(self.address_byte_size()))?;
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes `value` as a target-pointer-sized little-endian value at `address`.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the underlying [`write`](Self::write).
    fn write_pointer(&mut self, address: u64, value: u64) -> Result<()> {
        let size = self.address_byte_size() as usize;
        self.write(address, &value.to_le_bytes()[..size])
    }
}

/// An allocated region of the simulated address space (internal).
///
/// # Validity
///
/// The `valid` flag tracks freed regions without removing them from the
/// region table, so use-after-free by a misbehaving session is detected
/// instead of silently recycled.
#[derive(Clone, Debug)]
struct Region {
    /// The raw bytes in this region.
    data: Vec<u8>,

    /// Whether this region is live (not freed).
    valid: bool,
}

impl Region {
    /// Creates a new zeroed region of the given size.
    fn new(size: usize) -> Self {
        Region {
            data: vec![0; size],
            valid: true,
        }
    }

    /// Returns the size of this region in bytes.
    #[inline]
    fn size(&self) -> usize {
        self.data.len()
    }
}

/// Simulated halted-process address space.
///
/// Backs the [`MemoryMap`] boundary for tests and examples: a region table
/// keyed by base address, bump allocation with per-request alignment, and
/// bounds-checked access that supports interior addresses.
///
/// # Capacity
///
/// Total allocation is capped at a configurable maximum; attempts beyond it
/// return [`Error::Allocation`].
///
/// # Example
///
/// ```rust
/// use procstage::target::{MemoryMap, ProcessMemory};
///
/// let mut memory = ProcessMemory::new(4096);
/// let base = memory.allocate(16, 8)?;
/// memory.write(base, &[1, 2, 3, 4])?;
/// assert_eq!(memory.read(base, 4)?, [1, 2, 3, 4]);
/// # Ok::<(), procstage::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct ProcessMemory {
    /// Memory regions indexed by their base address.
    regions: HashMap<u64, Region>,
    /// Next address to allocate.
    next_address: u64,
    /// Total bytes currently allocated.
    current_size: usize,
    /// Maximum allowed allocation.
    max_size: usize,
    /// Pointer size of the simulated target.
    address_byte_size: u32,
}

impl ProcessMemory {
    /// Creates a new simulated address space with the given capacity in bytes.
    ///
    /// The simulated target is 64-bit; see
    /// [`with_address_byte_size`](Self::with_address_byte_size) for narrower
    /// targets.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        ProcessMemory {
            regions: HashMap::new(),
            // Start at a high address to keep staged regions away from
            // plausible program addresses used in tests
            next_address: 0x7FFF_0000_0000,
            current_size: 0,
            max_size,
            address_byte_size: 8,
        }
    }

    /// Sets the simulated target's pointer size (4 or 8 bytes).
    #[must_use]
    pub fn with_address_byte_size(mut self, address_byte_size: u32) -> Self {
        self.address_byte_size = address_byte_size;
        self
    }

    /// Maps a region at a caller-chosen base address with the given contents.
    ///
    /// Used by tests to model pre-existing program memory such as a thread's
    /// stack or a global's storage, which entities then read and write through
    /// the ordinary [`MemoryMap`] operations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the capacity limit would be exceeded
    /// or the range overlaps an existing live region.
    pub fn map_region(&mut self, base: u64, data: Vec<u8>) -> Result<()> {
        if self.current_size + data.len() > self.max_size {
            return Err(Error::Allocation {
                size: data.len() as u64,
                alignment: 1,
                reason: "capacity limit exceeded".to_string(),
            });
        }

        let end = base + data.len() as u64;
        for (&other_base, region) in &self.regions {
            let other_end = other_base + region.size() as u64;
            if region.valid && base < other_end && other_base < end {
                return Err(Error::Allocation {
                    size: data.len() as u64,
                    alignment: 1,
                    reason: format!("range overlaps live region at {other_base:#x}"),
                });
            }
        }

        self.current_size += data.len();
        self.regions.insert(
            base,
            Region {
                data,
                valid: true,
            },
        );
        Ok(())
    }

    /// Returns whether `address` is the base of a live allocation.
    #[must_use]
    pub fn is_valid(&self, address: u64) -> bool {
        self.regions
            .get(&address)
            .is_some_and(|region| region.valid)
    }

    /// Total bytes currently allocated.
    #[must_use]
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Finds the live region containing an address and returns it with the offset.
    ///
    /// Supports exact base lookups (fast path) and interior addresses (scan).
    fn find_region(&self, address: u64) -> Option<(&Region, usize)> {
        if let Some(region) = self.regions.get(&address) {
            if region.valid {
                return Some((region, 0));
            }
        }

        for (&base, region) in &self.regions {
            if region.valid && address >= base && address < base + region.size() as u64 {
                #[allow(clippy::cast_possible_truncation)] // Offset bounded by region size
                let offset = (address - base) as usize;
                return Some((region, offset));
            }
        }

        None
    }

    /// Mutable variant of [`find_region`](Self::find_region).
    ///
    /// Two-pass lookup due to borrow checker constraints.
    fn find_region_mut(&mut self, address: u64) -> Option<(&mut Region, usize)> {
        let mut found_base = None;

        if let Some(region) = self.regions.get(&address) {
            if region.valid {
                found_base = Some(address);
            }
        }

        if found_base.is_none() {
            for (&base, region) in &self.regions {
                if region.valid && address >= base && address < base + region.size() as u64 {
                    found_base = Some(base);
                    break;
                }
            }
        }

        if let Some(base) = found_base {
            if let Some(region) = self.regions.get_mut(&base) {
                #[allow(clippy::cast_possible_truncation)] // Offset bounded by region size
                let offset = (address - base) as usize;
                return Some((region, offset));
            }
        }

        None
    }
}

impl MemoryMap for ProcessMemory {
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<u64> {
        let size_usize = usize::try_from(size).map_err(|_| Error::Allocation {
            size,
            alignment,
            reason: "size does not fit the host".to_string(),
        })?;

        if !alignment.is_power_of_two() {
            return Err(Error::Allocation {
                size,
                alignment,
                reason: "alignment is not a power of two".to_string(),
            });
        }

        if self.current_size + size_usize > self.max_size {
            return Err(Error::Allocation {
                size,
                alignment,
                reason: format!(
                    "capacity limit exceeded ({} of {} bytes in use)",
                    self.current_size, self.max_size
                ),
            });
        }

        // At least 16-byte aligned, more if the request demands it
        let align = alignment.max(16);
        let address = (self.next_address + align - 1) & !(align - 1);
        self.next_address = address + size;

        self.regions.insert(address, Region::new(size_usize));
        self.current_size += size_usize;

        Ok(address)
    }

    fn deallocate(&mut self, address: u64) -> Result<()> {
        if let Some(region) = self.regions.get_mut(&address) {
            if region.valid {
                region.valid = false;
                self.current_size = self.current_size.saturating_sub(region.size());
                return Ok(());
            }
        }
        Err(Error::MemoryAccess {
            address,
            reason: "not a live allocation".to_string(),
        })
    }

    fn read(&self, address: u64, len: u64) -> Result<Vec<u8>> {
        let len_usize = usize::try_from(len).map_err(|_| Error::MemoryAccess {
            address,
            reason: "read length does not fit the host".to_string(),
        })?;

        let (region, offset) = self.find_region(address).ok_or(Error::MemoryAccess {
            address,
            reason: "address not in any mapped region".to_string(),
        })?;

        if offset + len_usize > region.size() {
            return Err(Error::MemoryAccess {
                address,
                reason: "read runs past the end of the region".to_string(),
            });
        }

        Ok(region.data[offset..offset + len_usize].to_vec())
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        let (region, offset) = self.find_region_mut(address).ok_or(Error::MemoryAccess {
            address,
            reason: "address not in any mapped region".to_string(),
        })?;

        if offset + bytes.len() > region.size() {
            return Err(Error::MemoryAccess {
                address,
                reason: "write runs past the end of the region".to_string(),
            });
        }

        region.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn address_byte_size(&self) -> u32 {
        self.address_byte_size
    }
}
