//! Function tables

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Function, Limits};
use crate::error::EvalError;

/// Largest element count a table may reach
pub const MAX_TABLE_ELEMENTS: u32 = 10_000_000;

struct TableInner {
    maximum: Option<u32>,
    elements: RwLock<Vec<Option<Function>>>,
}

/// A growable table of function references shared by reference
#[derive(Clone)]
pub struct Table(Arc<TableInner>);

impl Table {
    pub fn new(limits: Limits) -> Result<Self, EvalError> {
        if !limits.is_valid() || limits.min > MAX_TABLE_ELEMENTS {
            return Err(EvalError::type_error(format!("invalid table limits {}", limits)));
        }
        let mut elements = Vec::new();
        elements
            .try_reserve_exact(limits.min as usize)
            .map_err(|_| Self::allocation_failed(limits.min))?;
        elements.resize(limits.min as usize, None);
        Ok(Self(Arc::new(TableInner {
            maximum: limits.max,
            elements: RwLock::new(elements),
        })))
    }

    pub fn size(&self) -> u32 {
        self.0.elements.read().len() as u32
    }

    pub fn maximum(&self) -> Option<u32> {
        self.0.maximum
    }

    pub fn limits(&self) -> Limits {
        Limits::new(self.size(), self.0.maximum)
    }

    pub fn get(&self, index: u32) -> Result<Option<Function>, EvalError> {
        self.0
            .elements
            .read()
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Self::out_of_bounds(index, self.size()))
    }

    pub fn set(&self, index: u32, element: Option<Function>) -> Result<(), EvalError> {
        let mut elements = self.0.elements.write();
        let size = elements.len() as u32;
        let slot = elements
            .get_mut(index as usize)
            .ok_or_else(|| Self::out_of_bounds(index, size))?;
        *slot = element;
        Ok(())
    }

    /// Grow by `delta` elements filled with `init`, returning the previous size
    pub fn grow(&self, delta: u32, init: Option<Function>) -> Result<u32, EvalError> {
        let mut elements = self.0.elements.write();
        let old = elements.len() as u32;
        let new = old
            .checked_add(delta)
            .filter(|&n| n <= self.0.maximum.unwrap_or(MAX_TABLE_ELEMENTS).min(MAX_TABLE_ELEMENTS))
            .ok_or_else(|| {
                EvalError::type_error(format!("cannot grow table of {} elements by {}", old, delta))
            })?;
        elements
            .try_reserve_exact(delta as usize)
            .map_err(|_| Self::allocation_failed(new))?;
        elements.resize(new as usize, init);
        Ok(old)
    }

    pub fn ptr_eq(&self, other: &Table) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn allocation_failed(size: u32) -> EvalError {
        EvalError::type_error(format!("cannot allocate table of {} elements", size))
    }

    fn out_of_bounds(index: u32, size: u32) -> EvalError {
        EvalError::type_error(format!("table index {} out of bounds (size {})", index, size))
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table{}", self.limits())
    }
}
