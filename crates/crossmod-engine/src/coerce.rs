//! Type coercion between the Script and Binary value domains
//!
//! Every function here is pure: it never touches a binding slot. The
//! evaluator calls [`to_binary`] / [`to_script`] when it snapshots a
//! cross-kind import, and the linker calls [`check_link`] for Binary→Binary
//! imports.

use crate::error::{EvalError, Incompatibility};
use crate::record::{BindingKind, TypeSig};
use crate::value::{Function, Global, NumType, RawNum, ResourceKind, Value};

/// ECMAScript ToInt32
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc().rem_euclid(4_294_967_296.0);
    wrapped as u32 as i32
}

/// ToNumber for the primitive Script values this bridge supports
pub fn to_number(value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Undefined => Ok(f64::NAN),
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => Ok(*n),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(0.0)
            } else {
                Ok(trimmed.parse::<f64>().unwrap_or(f64::NAN))
            }
        }
        Value::BigInt(_) => Err(EvalError::type_error("cannot convert a BigInt to a number")),
        Value::Global(_) | Value::Memory(_) | Value::Table(_) | Value::Function(_) => Ok(f64::NAN),
    }
}

/// Convert a Script value to a raw number of type `ty`
pub fn to_raw(value: &Value, ty: NumType) -> Result<RawNum, EvalError> {
    match ty {
        NumType::I32 => Ok(RawNum::I32(to_int32(to_number(value)?))),
        NumType::F32 => Ok(RawNum::F32(to_number(value)? as f32)),
        NumType::F64 => Ok(RawNum::F64(to_number(value)?)),
        NumType::I64 => match value {
            Value::BigInt(n) => Ok(RawNum::I64(*n)),
            Value::Bool(b) => Ok(RawNum::I64(i64::from(*b))),
            other => Err(EvalError::type_error(format!(
                "cannot convert {} to a BigInt",
                other.type_name()
            ))),
        },
    }
}

/// Convert a raw number to its Script representation
pub fn from_raw(raw: RawNum) -> Value {
    match raw {
        RawNum::I32(v) => Value::Number(f64::from(v)),
        RawNum::I64(v) => Value::BigInt(v),
        RawNum::F32(v) => Value::Number(f64::from(v)),
        RawNum::F64(v) => Value::Number(v),
    }
}

/// The value a Script importer observes for a Binary export
///
/// Binary exports are already representation objects, so the handle itself
/// is returned and identity is stable across import paths.
pub fn to_script(value: &Value) -> Value {
    value.clone()
}

/// The value a Binary importer observes for a Script export
pub fn to_binary(kind: BindingKind, ty: &TypeSig, value: &Value) -> Result<Value, Incompatibility> {
    match (kind, ty) {
        (BindingKind::Global, TypeSig::Numeric(expected)) => {
            if let Value::Global(global) = value {
                return if global.ty() == *expected {
                    Ok(value.clone())
                } else {
                    Err(Incompatibility::GlobalType {
                        expected: *expected,
                        actual: global.ty(),
                    })
                };
            }
            if expected.mutable {
                return Err(Incompatibility::MutableFromPlainValue { expected: *expected });
            }
            let raw = match value {
                Value::Number(_) | Value::BigInt(_) | Value::Bool(_) => {
                    to_raw(value, expected.value).map_err(|_| Incompatibility::NotNumeric {
                        expected: expected.value,
                        actual: value.type_name(),
                    })?
                }
                other => {
                    return Err(Incompatibility::NotNumeric {
                        expected: expected.value,
                        actual: other.type_name(),
                    })
                }
            };
            Global::new(*expected, raw)
                .map(Value::Global)
                .map_err(|_| Incompatibility::NotNumeric {
                    expected: expected.value,
                    actual: value.type_name(),
                })
        }
        (BindingKind::Memory, TypeSig::Resource(ResourceKind::Memory, required)) => match value {
            Value::Memory(memory) => {
                let actual = memory.limits();
                if actual.satisfies(required) {
                    Ok(value.clone())
                } else {
                    Err(Incompatibility::Limits {
                        kind: ResourceKind::Memory,
                        expected: *required,
                        actual,
                    })
                }
            }
            other => Err(Incompatibility::NotResource {
                kind: ResourceKind::Memory,
                actual: other.type_name(),
            }),
        },
        (BindingKind::Table, TypeSig::Resource(ResourceKind::Table, required)) => match value {
            Value::Table(table) => {
                let actual = table.limits();
                if actual.satisfies(required) {
                    Ok(value.clone())
                } else {
                    Err(Incompatibility::Limits {
                        kind: ResourceKind::Table,
                        expected: *required,
                        actual,
                    })
                }
            }
            other => Err(Incompatibility::NotResource {
                kind: ResourceKind::Table,
                actual: other.type_name(),
            }),
        },
        (BindingKind::Function, TypeSig::Function(expected)) => match value {
            Value::Function(function) => match function.signature() {
                Some(actual) if actual == expected => Ok(value.clone()),
                Some(actual) => Err(Incompatibility::Signature {
                    expected: expected.clone(),
                    actual: actual.clone(),
                }),
                None => Ok(Value::Function(Function::adapter(expected.clone(), function.clone()))),
            },
            other => Err(Incompatibility::NotCallable {
                actual: other.type_name(),
            }),
        },
        _ => Err(Incompatibility::KindMismatch {
            expected: kind,
            actual: BindingKind::Value,
        }),
    }
}

/// Static compatibility of a Binary import with a Binary export
pub fn check_link(
    import_kind: BindingKind,
    import_ty: &TypeSig,
    export_kind: BindingKind,
    export_ty: &TypeSig,
) -> Result<(), Incompatibility> {
    if import_kind != export_kind {
        return Err(Incompatibility::KindMismatch {
            expected: import_kind,
            actual: export_kind,
        });
    }
    match (import_ty, export_ty) {
        (TypeSig::Numeric(expected), TypeSig::Numeric(actual)) => {
            if expected == actual {
                Ok(())
            } else {
                Err(Incompatibility::GlobalType {
                    expected: *expected,
                    actual: *actual,
                })
            }
        }
        (TypeSig::Resource(kind, required), TypeSig::Resource(_, actual)) => {
            if actual.satisfies(required) {
                Ok(())
            } else {
                Err(Incompatibility::Limits {
                    kind: *kind,
                    expected: *required,
                    actual: *actual,
                })
            }
        }
        (TypeSig::Function(expected), TypeSig::Function(actual)) => {
            if expected == actual {
                Ok(())
            } else {
                Err(Incompatibility::Signature {
                    expected: expected.clone(),
                    actual: actual.clone(),
                })
            }
        }
        _ => Err(Incompatibility::KindMismatch {
            expected: import_kind,
            actual: export_kind,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FuncType, GlobalType, Limits, Memory};

    #[test]
    fn test_to_int32() {
        assert_eq!(to_int32(42.9), 42);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(4_294_967_296.0 + 5.0), 5);
        assert_eq!(to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn test_plain_number_to_immutable_global() {
        let ty = TypeSig::Numeric(GlobalType::immutable(NumType::I32));
        let out = to_binary(BindingKind::Global, &ty, &Value::Number(42.0)).unwrap();
        let global = out.as_global().unwrap();
        assert_eq!(global.get(), RawNum::I32(42));
        assert!(!global.ty().mutable);
    }

    #[test]
    fn test_plain_number_to_mutable_global_fails() {
        let ty = TypeSig::Numeric(GlobalType::mutable(NumType::I32));
        let err = to_binary(BindingKind::Global, &ty, &Value::Number(42.0)).unwrap_err();
        assert!(matches!(err, Incompatibility::MutableFromPlainValue { .. }));
    }

    #[test]
    fn test_boxed_global_binds_directly() {
        let boxed = Global::new(GlobalType::mutable(NumType::F64), RawNum::F64(1.0)).unwrap();
        let ty = TypeSig::Numeric(GlobalType::mutable(NumType::F64));
        let out = to_binary(BindingKind::Global, &ty, &Value::Global(boxed.clone())).unwrap();
        assert!(out.as_global().unwrap().ptr_eq(&boxed));

        let wrong = TypeSig::Numeric(GlobalType::immutable(NumType::F64));
        assert!(matches!(
            to_binary(BindingKind::Global, &wrong, &Value::Global(boxed)),
            Err(Incompatibility::GlobalType { .. })
        ));
    }

    #[test]
    fn test_i64_requires_bigint() {
        let ty = TypeSig::Numeric(GlobalType::immutable(NumType::I64));
        assert!(to_binary(BindingKind::Global, &ty, &Value::Number(1.0)).is_err());
        let out = to_binary(BindingKind::Global, &ty, &Value::BigInt(7)).unwrap();
        assert_eq!(out.as_global().unwrap().get(), RawNum::I64(7));

        let i32_ty = TypeSig::Numeric(GlobalType::immutable(NumType::I32));
        assert!(to_binary(BindingKind::Global, &i32_ty, &Value::BigInt(7)).is_err());
        assert!(to_binary(BindingKind::Global, &i32_ty, &Value::string("7")).is_err());
    }

    #[test]
    fn test_bool_global_matches_call_conversion() {
        let ty = TypeSig::Numeric(GlobalType::immutable(NumType::I64));
        let out = to_binary(BindingKind::Global, &ty, &Value::Bool(true)).unwrap();
        assert_eq!(out.as_global().unwrap().get(), RawNum::I64(1));
        assert_eq!(to_raw(&Value::Bool(true), NumType::I64).unwrap(), RawNum::I64(1));

        let f64_ty = TypeSig::Numeric(GlobalType::immutable(NumType::F64));
        let out = to_binary(BindingKind::Global, &f64_ty, &Value::Bool(false)).unwrap();
        assert_eq!(out.as_global().unwrap().get(), RawNum::F64(0.0));
        assert!(to_binary(BindingKind::Global, &f64_ty, &Value::Undefined).is_err());
    }

    #[test]
    fn test_memory_bounds() {
        let memory = Memory::new(Limits::new(1, Some(2))).unwrap();
        let ok = TypeSig::Resource(ResourceKind::Memory, Limits::new(1, Some(4)));
        assert!(to_binary(BindingKind::Memory, &ok, &Value::Memory(memory.clone())).is_ok());

        let too_big = TypeSig::Resource(ResourceKind::Memory, Limits::at_least(2));
        assert!(matches!(
            to_binary(BindingKind::Memory, &too_big, &Value::Memory(memory)),
            Err(Incompatibility::Limits { .. })
        ));
        assert!(matches!(
            to_binary(BindingKind::Memory, &ok, &Value::Number(1.0)),
            Err(Incompatibility::NotResource { .. })
        ));
    }

    #[test]
    fn test_script_function_gets_wrapped() {
        let f = Function::host("f", |_| Ok(Value::Number(3.0)));
        let ty = FuncType::new(&[], &[NumType::I32]);
        let sig = TypeSig::Function(ty.clone());
        let out = to_binary(BindingKind::Function, &sig, &Value::Function(f.clone())).unwrap();
        let wrapped = out.as_function().unwrap();
        assert!(!wrapped.ptr_eq(&f));
        assert_eq!(wrapped.signature(), Some(&ty));
        assert_eq!(wrapped.invoke(&[]).unwrap(), vec![RawNum::I32(3)]);

        // Wrapping a wrapper with the same signature binds directly
        let again = to_binary(BindingKind::Function, &TypeSig::Function(ty), &out).unwrap();
        assert!(again.as_function().unwrap().ptr_eq(wrapped));
    }

    #[test]
    fn test_check_link() {
        let g = TypeSig::Numeric(GlobalType::mutable(NumType::I32));
        assert!(check_link(BindingKind::Global, &g, BindingKind::Global, &g).is_ok());
        assert!(check_link(
            BindingKind::Global,
            &g,
            BindingKind::Global,
            &TypeSig::Numeric(GlobalType::immutable(NumType::I32))
        )
        .is_err());
        assert!(matches!(
            check_link(
                BindingKind::Function,
                &TypeSig::Function(FuncType::default()),
                BindingKind::Global,
                &g
            ),
            Err(Incompatibility::KindMismatch { .. })
        ));

        let required = TypeSig::Resource(ResourceKind::Table, Limits::new(1, Some(10)));
        let provided = TypeSig::Resource(ResourceKind::Table, Limits::new(2, Some(8)));
        assert!(check_link(BindingKind::Table, &required, BindingKind::Table, &provided).is_ok());
        assert!(check_link(BindingKind::Table, &provided, BindingKind::Table, &required).is_err());
    }
}
