//! Callables shared across module kinds
//!
//! A function is either Script-callable (dynamic arguments) or
//! Binary-callable (a fixed signature over raw numbers). Binary-callable
//! functions can be called from Script code and vice versa; conversions go
//! through the coercion layer on every call.

use std::fmt;
use std::sync::{Arc, Weak};

use super::{FuncType, NumType, RawNum, Value};
use crate::coerce;
use crate::env::ModuleEnvironment;
use crate::error::EvalError;

/// Code of a Script function, run against its defining module's environment
pub type ScriptCode =
    Arc<dyn Fn(&Arc<ModuleEnvironment>, &[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// Code of a Binary function, run against its defining module's environment
pub type BinaryCode =
    Arc<dyn Fn(&Arc<ModuleEnvironment>, &[RawNum]) -> Result<Vec<RawNum>, EvalError> + Send + Sync>;

type HostCode = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

enum Callable {
    Script {
        code: ScriptCode,
        env: Weak<ModuleEnvironment>,
    },
    Host(HostCode),
    Binary {
        ty: FuncType,
        code: BinaryCode,
        env: Weak<ModuleEnvironment>,
    },
    /// Binary-callable wrapper around a Script-callable target
    Adapter { ty: FuncType, target: Function },
}

struct FunctionInner {
    name: String,
    callable: Callable,
}

/// A function handle; clones share identity
#[derive(Clone)]
pub struct Function(Arc<FunctionInner>);

impl Function {
    pub(crate) fn script(name: &str, code: ScriptCode, env: Weak<ModuleEnvironment>) -> Self {
        Self::from_callable(name, Callable::Script { code, env })
    }

    pub(crate) fn binary(
        name: &str,
        ty: FuncType,
        code: BinaryCode,
        env: Weak<ModuleEnvironment>,
    ) -> Self {
        Self::from_callable(name, Callable::Binary { ty, code, env })
    }

    pub(crate) fn adapter(ty: FuncType, target: Function) -> Self {
        let name = target.name().to_string();
        Self::from_callable(&name, Callable::Adapter { ty, target })
    }

    /// A Script-callable function supplied by the embedder
    pub fn host<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self::from_callable(name, Callable::Host(Arc::new(f)))
    }

    fn from_callable(name: &str, callable: Callable) -> Self {
        Self(Arc::new(FunctionInner {
            name: name.to_string(),
            callable,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Signature, present for Binary-callable functions only
    pub fn signature(&self) -> Option<&FuncType> {
        match &self.0.callable {
            Callable::Binary { ty, .. } | Callable::Adapter { ty, .. } => Some(ty),
            Callable::Script { .. } | Callable::Host(_) => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.signature().is_some()
    }

    /// Call with Script values
    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        match &self.0.callable {
            Callable::Script { code, env } => code(&self.upgrade(env)?, args),
            Callable::Host(code) => code(args),
            Callable::Binary { ty, .. } | Callable::Adapter { ty, .. } => {
                let raw = ty
                    .params
                    .iter()
                    .enumerate()
                    .map(|(i, &param)| {
                        coerce::to_raw(args.get(i).unwrap_or(&Value::Undefined), param)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let results = self.invoke(&raw)?;
                match results.as_slice() {
                    [] => Ok(Value::Undefined),
                    [single] => Ok(coerce::from_raw(*single)),
                    _ => Err(EvalError::type_error(format!(
                        "'{}' returns {} values, which a Script caller cannot receive",
                        self.name(),
                        results.len()
                    ))),
                }
            }
        }
    }

    /// Call with raw numbers; only Binary-callable functions accept this
    pub fn invoke(&self, args: &[RawNum]) -> Result<Vec<RawNum>, EvalError> {
        match &self.0.callable {
            Callable::Binary { ty, code, env } => {
                self.check_types("argument", &ty.params, args)?;
                let results = code(&self.upgrade(env)?, args)?;
                self.check_types("result", &ty.results, &results)?;
                Ok(results)
            }
            Callable::Adapter { ty, target } => {
                self.check_types("argument", &ty.params, args)?;
                let script_args: Vec<Value> = args.iter().map(|&a| coerce::from_raw(a)).collect();
                let result = target.call(&script_args)?;
                match ty.results.as_slice() {
                    [] => Ok(Vec::new()),
                    [single] => Ok(vec![coerce::to_raw(&result, *single)?]),
                    _ => Err(EvalError::type_error(format!(
                        "a Script function cannot produce the {} results '{}' declares",
                        ty.results.len(),
                        self.name()
                    ))),
                }
            }
            Callable::Script { .. } | Callable::Host(_) => Err(EvalError::type_error(format!(
                "'{}' is not a Binary-callable function",
                self.name()
            ))),
        }
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn upgrade(&self, env: &Weak<ModuleEnvironment>) -> Result<Arc<ModuleEnvironment>, EvalError> {
        env.upgrade().ok_or_else(|| {
            EvalError::type_error(format!("the module defining '{}' has been dropped", self.name()))
        })
    }

    fn check_types(
        &self,
        what: &str,
        expected: &[NumType],
        actual: &[RawNum],
    ) -> Result<(), EvalError> {
        let matches = expected.len() == actual.len()
            && expected.iter().zip(actual).all(|(ty, v)| v.ty() == *ty);
        if matches {
            Ok(())
        } else {
            Err(EvalError::type_error(format!(
                "{} types of '{}' do not match its signature",
                what,
                self.name()
            )))
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signature() {
            Some(ty) => write!(f, "Function({} {})", self.name(), ty),
            None => write!(f, "Function({})", self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_function_is_script_callable() {
        let f = Function::host("double", |args| {
            let n = args.first().and_then(Value::as_number).unwrap_or(0.0);
            Ok(Value::Number(n * 2.0))
        });
        assert!(!f.is_binary());
        assert_eq!(f.call(&[Value::Number(21.0)]).unwrap(), Value::Number(42.0));
        assert!(f.invoke(&[]).is_err());
    }

    #[test]
    fn test_adapter_converts_arguments_and_results() {
        let target = Function::host("add", |args| {
            let sum: f64 = args.iter().filter_map(Value::as_number).sum();
            Ok(Value::Number(sum))
        });
        let ty = FuncType::new(&[NumType::I32, NumType::F64], &[NumType::I32]);
        let adapter = Function::adapter(ty, target);

        assert!(adapter.is_binary());
        let out = adapter.invoke(&[RawNum::I32(40), RawNum::F64(2.9)]).unwrap();
        assert_eq!(out, vec![RawNum::I32(42)]);
        assert!(adapter.invoke(&[RawNum::I32(1)]).is_err());

        // Script-side call goes through the same conversions
        assert_eq!(
            adapter.call(&[Value::Number(1.0), Value::Number(1.0)]).unwrap(),
            Value::Number(2.0)
        );
    }
}
