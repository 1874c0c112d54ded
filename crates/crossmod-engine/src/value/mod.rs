//! Host value bridge
//!
//! Values observed by Script modules, and the representation objects
//! (globals, memories, tables, functions) both module kinds share. A
//! representation object is a handle: cloning it never copies the resource,
//! so identity survives every import path.

mod function;
mod global;
mod memory;
mod table;

pub use function::{BinaryCode, Function, ScriptCode};
pub use global::Global;
pub use memory::{Memory, MAX_PAGES, PAGE_SIZE};
pub use table::{Table, MAX_TABLE_ELEMENTS};

use std::fmt;
use std::sync::Arc;

/// Numeric value types of Binary modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumType {
    I32,
    I64,
    F32,
    F64,
}

impl fmt::Display for NumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NumType::I32 => "i32",
            NumType::I64 => "i64",
            NumType::F32 => "f32",
            NumType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A raw Binary-kind numeric value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawNum {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl RawNum {
    /// Type of this value
    pub fn ty(&self) -> NumType {
        match self {
            RawNum::I32(_) => NumType::I32,
            RawNum::I64(_) => NumType::I64,
            RawNum::F32(_) => NumType::F32,
            RawNum::F64(_) => NumType::F64,
        }
    }

    /// Zero value of the given type
    pub fn zero(ty: NumType) -> Self {
        match ty {
            NumType::I32 => RawNum::I32(0),
            NumType::I64 => RawNum::I64(0),
            NumType::F32 => RawNum::F32(0.0),
            NumType::F64 => RawNum::F64(0.0),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            RawNum::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawNum::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            RawNum::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawNum::F64(v) => Some(*v),
            _ => None,
        }
    }
}

/// Type of a global: value type plus mutability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalType {
    pub value: NumType,
    pub mutable: bool,
}

impl GlobalType {
    pub const fn immutable(value: NumType) -> Self {
        Self {
            value,
            mutable: false,
        }
    }

    pub const fn mutable(value: NumType) -> Self {
        Self {
            value,
            mutable: true,
        }
    }
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mutable {
            write!(f, "mut {}", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

/// Size bounds of a memory (in pages) or table (in elements)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl Limits {
    pub const fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    pub const fn at_least(min: u32) -> Self {
        Self { min, max: None }
    }

    /// Whether `min <= max` when a maximum is present
    pub fn is_valid(&self) -> bool {
        self.max.map_or(true, |max| self.min <= max)
    }

    /// Subtyping: `self` (what is provided) satisfies `required`
    pub fn satisfies(&self, required: &Limits) -> bool {
        if self.min < required.min {
            return false;
        }
        match (required.max, self.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(required_max), Some(max)) => max <= required_max,
        }
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{{min {}, max {}}}", self.min, max),
            None => write!(f, "{{min {}}}", self.min),
        }
    }
}

/// Kinds of sized resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Memory,
    Table,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Memory => f.write_str("memory"),
            ResourceKind::Table => f.write_str("table"),
        }
    }
}

/// Signature of a Binary-callable function
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    pub params: Vec<NumType>,
    pub results: Vec<NumType>,
}

impl FuncType {
    pub fn new(params: &[NumType], results: &[NumType]) -> Self {
        Self {
            params: params.to_vec(),
            results: results.to_vec(),
        }
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(types: &[NumType]) -> String {
            types
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
        write!(f, "({}) -> ({})", list(&self.params), list(&self.results))
    }
}

/// A value as observed by a Script module
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i64),
    String(Arc<str>),
    Global(Global),
    Memory(Memory),
    Table(Table),
    Function(Function),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    /// Name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Global(_) => "global object",
            Value::Memory(_) => "memory object",
            Value::Table(_) => "table object",
            Value::Function(_) => "function",
        }
    }

    /// SameValue for primitives, reference identity for representation objects
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                let same_sign = a.is_sign_negative() == b.is_sign_negative();
                (a.is_nan() && b.is_nan()) || (a == b && same_sign)
            }
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Global(a), Value::Global(b)) => a.ptr_eq(b),
            (Value::Memory(a), Value::Memory(b)) => a.ptr_eq(b),
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_global(&self) -> Option<&Global> {
        match self {
            Value::Global(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<&Memory> {
        match self {
            Value::Memory(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::BigInt(n) => write!(f, "{}n", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Global(g) => write!(f, "{:?}", g),
            Value::Memory(m) => write!(f, "{:?}", m),
            Value::Table(t) => write!(f, "{:?}", t),
            Value::Function(func) => write!(f, "{:?}", func),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}
