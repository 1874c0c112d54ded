//! Linear memory views

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::Limits;
use crate::error::EvalError;

/// Bytes per page
pub const PAGE_SIZE: usize = 65536;

/// Largest page count a memory may reach
pub const MAX_PAGES: u32 = 65536;

struct MemoryInner {
    maximum: Option<u32>,
    bytes: RwLock<Vec<u8>>,
}

/// A growable, bounds-checked byte buffer shared by reference
#[derive(Clone)]
pub struct Memory(Arc<MemoryInner>);

impl Memory {
    pub fn new(limits: Limits) -> Result<Self, EvalError> {
        let in_range = limits.min <= MAX_PAGES && limits.max.map_or(true, |m| m <= MAX_PAGES);
        if !limits.is_valid() || !in_range {
            return Err(EvalError::type_error(format!("invalid memory limits {}", limits)));
        }
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(limits.min as usize * PAGE_SIZE)
            .map_err(|_| Self::allocation_failed(limits.min))?;
        bytes.resize(limits.min as usize * PAGE_SIZE, 0);
        Ok(Self(Arc::new(MemoryInner {
            maximum: limits.max,
            bytes: RwLock::new(bytes),
        })))
    }

    /// Current size in pages
    pub fn size(&self) -> u32 {
        (self.0.bytes.read().len() / PAGE_SIZE) as u32
    }

    pub fn maximum(&self) -> Option<u32> {
        self.0.maximum
    }

    /// Current bounds, with the current size as minimum
    pub fn limits(&self) -> Limits {
        Limits::new(self.size(), self.0.maximum)
    }

    /// Grow by `delta` pages, returning the previous size
    pub fn grow(&self, delta: u32) -> Result<u32, EvalError> {
        let mut bytes = self.0.bytes.write();
        let old = (bytes.len() / PAGE_SIZE) as u32;
        let new = old
            .checked_add(delta)
            .filter(|&n| n <= self.0.maximum.unwrap_or(MAX_PAGES))
            .ok_or_else(|| {
                EvalError::type_error(format!("cannot grow memory of {} pages by {}", old, delta))
            })?;
        bytes
            .try_reserve_exact(delta as usize * PAGE_SIZE)
            .map_err(|_| Self::allocation_failed(new))?;
        bytes.resize(new as usize * PAGE_SIZE, 0);
        Ok(old)
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, EvalError> {
        let bytes = self.0.bytes.read();
        let end = Self::checked_end(offset, len, bytes.len())?;
        Ok(bytes[offset..end].to_vec())
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), EvalError> {
        let mut bytes = self.0.bytes.write();
        let end = Self::checked_end(offset, data.len(), bytes.len())?;
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn load_i32(&self, offset: usize) -> Result<i32, EvalError> {
        let raw = self.read(offset, 4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn store_i32(&self, offset: usize, value: i32) -> Result<(), EvalError> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn ptr_eq(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn allocation_failed(pages: u32) -> EvalError {
        EvalError::type_error(format!("cannot allocate memory of {} pages", pages))
    }

    fn checked_end(offset: usize, len: usize, size: usize) -> Result<usize, EvalError> {
        offset
            .checked_add(len)
            .filter(|&end| end <= size)
            .ok_or_else(|| {
                EvalError::type_error(format!(
                    "memory access out of bounds: {} bytes at offset {} (size {})",
                    len, offset, size
                ))
            })
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Memory{}", self.limits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_bounds() {
        let mem = Memory::new(Limits::new(1, Some(2))).unwrap();
        mem.store_i32(16, -7).unwrap();
        assert_eq!(mem.load_i32(16).unwrap(), -7);
        assert!(mem.write(PAGE_SIZE - 1, &[1, 2]).is_err());
        assert!(mem.read(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_grow_respects_maximum() {
        let mem = Memory::new(Limits::new(1, Some(2))).unwrap();
        assert_eq!(mem.grow(1).unwrap(), 1);
        assert_eq!(mem.size(), 2);
        assert!(mem.grow(1).is_err());
        assert_eq!(mem.limits(), Limits::new(2, Some(2)));
    }

    #[test]
    fn test_invalid_limits() {
        assert!(Memory::new(Limits::new(3, Some(2))).is_err());
        assert!(Memory::new(Limits::at_least(MAX_PAGES + 1)).is_err());
        assert!(Memory::new(Limits::new(0, Some(u32::MAX))).is_err());
    }

    #[test]
    fn test_grow_past_page_cap() {
        let mem = Memory::new(Limits::at_least(0)).unwrap();
        assert!(mem.grow(MAX_PAGES + 1).is_err());
        assert!(mem.grow(u32::MAX).is_err());
        assert_eq!(mem.size(), 0);
    }
}
