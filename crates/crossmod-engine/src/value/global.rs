//! Numeric global holders

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{GlobalType, RawNum, Value};
use crate::coerce;
use crate::error::EvalError;

struct GlobalInner {
    ty: GlobalType,
    value: RwLock<RawNum>,
}

/// A boxed numeric global shared by reference
///
/// Every clone observes in-place mutation through any other clone.
#[derive(Clone)]
pub struct Global(Arc<GlobalInner>);

impl Global {
    /// Create a global holding `init`, which must match the declared type
    pub fn new(ty: GlobalType, init: RawNum) -> Result<Self, EvalError> {
        if init.ty() != ty.value {
            return Err(EvalError::type_error(format!(
                "cannot initialize global {} with a {} value",
                ty,
                init.ty()
            )));
        }
        Ok(Self(Arc::new(GlobalInner {
            ty,
            value: RwLock::new(init),
        })))
    }

    pub fn ty(&self) -> GlobalType {
        self.0.ty
    }

    pub fn get(&self) -> RawNum {
        *self.0.value.read()
    }

    /// Store a new value; fails for immutable globals and mismatched types
    pub fn set(&self, value: RawNum) -> Result<(), EvalError> {
        if !self.0.ty.mutable {
            return Err(EvalError::type_error("cannot assign to an immutable global"));
        }
        if value.ty() != self.0.ty.value {
            return Err(EvalError::type_error(format!(
                "cannot store a {} value in global {}",
                value.ty(),
                self.0.ty
            )));
        }
        *self.0.value.write() = value;
        Ok(())
    }

    /// Read the value converted to the Script domain
    pub fn value(&self) -> Value {
        coerce::from_raw(self.get())
    }

    /// Write a Script value, converting it to the global's type
    pub fn set_value(&self, value: &Value) -> Result<(), EvalError> {
        let raw = coerce::to_raw(value, self.0.ty.value)?;
        self.set(raw)
    }

    pub fn ptr_eq(&self, other: &Global) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Global<{}>({:?})", self.0.ty, self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NumType;

    #[test]
    fn test_mutation_is_shared() {
        let g = Global::new(GlobalType::mutable(NumType::I32), RawNum::I32(5)).unwrap();
        let alias = g.clone();
        alias.set(RawNum::I32(6)).unwrap();
        assert_eq!(g.get(), RawNum::I32(6));
        assert!(g.ptr_eq(&alias));
    }

    #[test]
    fn test_immutable_rejects_set() {
        let g = Global::new(GlobalType::immutable(NumType::F64), RawNum::F64(1.5)).unwrap();
        assert!(matches!(g.set(RawNum::F64(2.0)), Err(EvalError::Type(_))));
        assert_eq!(g.value(), Value::Number(1.5));
    }

    #[test]
    fn test_type_checked() {
        assert!(Global::new(GlobalType::immutable(NumType::I32), RawNum::I64(1)).is_err());
        let g = Global::new(GlobalType::mutable(NumType::I64), RawNum::I64(1)).unwrap();
        assert!(g.set(RawNum::I32(2)).is_err());
        g.set_value(&Value::BigInt(9)).unwrap();
        assert_eq!(g.value(), Value::BigInt(9));
    }
}
