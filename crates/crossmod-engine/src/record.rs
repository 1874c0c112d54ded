//! Parsed module records
//!
//! A [`ModuleRecord`] is the normalized form a [`Loader`](crate::module::Loader)
//! produces for either module kind. It lists requested modules, declared
//! imports and exports, and the body the evaluator runs. Records are
//! immutable once loaded and shared behind an `Arc`.

use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::env::ModuleEnvironment;
use crate::error::EvalError;
use crate::value::{
    BinaryCode, FuncType, GlobalType, Limits, RawNum, ResourceKind, ScriptCode, Value,
};

/// The two module kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Dynamically typed, live reassignable bindings, hoisted functions
    Script,
    /// Statically typed, fixed export identity, start routine
    Binary,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Script => f.write_str("script"),
            ModuleKind::Binary => f.write_str("binary"),
        }
    }
}

/// What an import or export binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// An untyped Script value
    Value,
    Global,
    Memory,
    Table,
    Function,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindingKind::Value => "value",
            BindingKind::Global => "global",
            BindingKind::Memory => "memory",
            BindingKind::Table => "table",
            BindingKind::Function => "function",
        };
        f.write_str(name)
    }
}

/// Declared type of an import or export
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSig {
    /// No static type (Script bindings)
    None,
    Numeric(GlobalType),
    Resource(ResourceKind, Limits),
    Function(FuncType),
}

impl TypeSig {
    /// The binding kind this signature describes
    pub fn binding_kind(&self) -> BindingKind {
        match self {
            TypeSig::None => BindingKind::Value,
            TypeSig::Numeric(_) => BindingKind::Global,
            TypeSig::Resource(ResourceKind::Memory, _) => BindingKind::Memory,
            TypeSig::Resource(ResourceKind::Table, _) => BindingKind::Table,
            TypeSig::Function(_) => BindingKind::Function,
        }
    }
}

/// A declared import
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    /// Specifier of the module imported from
    pub module: String,
    /// Export name requested from that module
    pub name: String,
    /// Name the importing module reads the binding by
    pub local: String,
    pub kind: BindingKind,
    pub ty: TypeSig,
}

impl ImportDecl {
    fn typed(module: &str, name: &str, ty: TypeSig) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            local: name.to_string(),
            kind: ty.binding_kind(),
            ty,
        }
    }

    /// An untyped Script import
    pub fn value(module: &str, name: &str) -> Self {
        Self::typed(module, name, TypeSig::None)
    }

    pub fn global(module: &str, name: &str, ty: GlobalType) -> Self {
        Self::typed(module, name, TypeSig::Numeric(ty))
    }

    pub fn memory(module: &str, name: &str, limits: Limits) -> Self {
        Self::typed(module, name, TypeSig::Resource(ResourceKind::Memory, limits))
    }

    pub fn table(module: &str, name: &str, limits: Limits) -> Self {
        Self::typed(module, name, TypeSig::Resource(ResourceKind::Table, limits))
    }

    pub fn function(module: &str, name: &str, ty: FuncType) -> Self {
        Self::typed(module, name, TypeSig::Function(ty))
    }

    /// Bind the import under a different local name
    pub fn with_local(mut self, local: &str) -> Self {
        self.local = local.to_string();
        self
    }
}

/// Where an export's value comes from
#[derive(Clone)]
pub enum ExportSource {
    /// A binding owned by the module: a Script variable or a Binary entity
    Local(String),
    /// A hoisted Script function declaration
    FunctionDeclaration(ScriptCode),
    /// A Binary module re-exporting the value it observed for an import
    Import(String),
    /// A Script re-export of another module's export
    Indirect { module: String, name: String },
}

impl fmt::Debug for ExportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportSource::Local(local) => f.debug_tuple("Local").field(local).finish(),
            ExportSource::FunctionDeclaration(_) => f.write_str("FunctionDeclaration"),
            ExportSource::Import(local) => f.debug_tuple("Import").field(local).finish(),
            ExportSource::Indirect { module, name } => f
                .debug_struct("Indirect")
                .field("module", module)
                .field("name", name)
                .finish(),
        }
    }
}

/// A declared export
#[derive(Debug, Clone)]
pub struct ExportDecl {
    pub name: String,
    pub kind: BindingKind,
    pub ty: TypeSig,
    pub source: ExportSource,
}

impl ExportDecl {
    fn entity(name: &str, ty: TypeSig) -> Self {
        Self {
            name: name.to_string(),
            kind: ty.binding_kind(),
            ty,
            source: ExportSource::Local(name.to_string()),
        }
    }

    /// Script export of the local binding with the same name
    pub fn local(name: &str) -> Self {
        Self::entity(name, TypeSig::None)
    }

    /// Hoisted Script function declaration
    pub fn function_declaration<F>(name: &str, code: F) -> Self
    where
        F: Fn(&Arc<ModuleEnvironment>, &[Value]) -> Result<Value, EvalError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            kind: BindingKind::Value,
            ty: TypeSig::None,
            source: ExportSource::FunctionDeclaration(Arc::new(code)),
        }
    }

    /// Script re-export: `export { name as alias } from module`
    pub fn reexport(alias: &str, module: &str, name: &str) -> Self {
        Self {
            name: alias.to_string(),
            kind: BindingKind::Value,
            ty: TypeSig::None,
            source: ExportSource::Indirect {
                module: module.to_string(),
                name: name.to_string(),
            },
        }
    }

    pub fn global(name: &str, ty: GlobalType) -> Self {
        Self::entity(name, TypeSig::Numeric(ty))
    }

    pub fn memory(name: &str, limits: Limits) -> Self {
        Self::entity(name, TypeSig::Resource(ResourceKind::Memory, limits))
    }

    pub fn table(name: &str, limits: Limits) -> Self {
        Self::entity(name, TypeSig::Resource(ResourceKind::Table, limits))
    }

    pub fn function(name: &str, ty: FuncType) -> Self {
        Self::entity(name, TypeSig::Function(ty))
    }

    pub fn with_source(mut self, source: ExportSource) -> Self {
        self.source = source;
        self
    }
}

/// Top-level code of a Script module
#[derive(Clone)]
pub struct ScriptBody {
    code: Arc<dyn Fn(&Arc<ModuleEnvironment>) -> Result<(), EvalError> + Send + Sync>,
}

impl ScriptBody {
    pub fn new<F>(code: F) -> Self
    where
        F: Fn(&Arc<ModuleEnvironment>) -> Result<(), EvalError> + Send + Sync + 'static,
    {
        Self { code: Arc::new(code) }
    }

    /// A body with no top-level statements
    pub fn empty() -> Self {
        Self::new(|_| Ok(()))
    }

    pub(crate) fn run(&self, env: &Arc<ModuleEnvironment>) -> Result<(), EvalError> {
        (self.code)(env)
    }
}

impl fmt::Debug for ScriptBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScriptBody")
    }
}

/// Initializer of a Binary global
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    Const(RawNum),
    /// Current value of an imported global, read at instantiation
    Import(String),
}

#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub name: String,
    pub ty: GlobalType,
    pub init: GlobalInit,
}

#[derive(Debug, Clone)]
pub struct MemoryDef {
    pub name: String,
    pub limits: Limits,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub limits: Limits,
}

#[derive(Clone)]
pub struct FuncDef {
    pub name: String,
    pub ty: FuncType,
    pub code: BinaryCode,
}

impl fmt::Debug for FuncDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncDef({} {})", self.name, self.ty)
    }
}

/// Bytes copied into a memory at instantiation
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub memory: String,
    pub offset: usize,
    pub bytes: Vec<u8>,
}

/// Functions written into a table at instantiation
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub table: String,
    pub offset: u32,
    pub functions: Vec<String>,
}

/// Definitions of a Binary module
///
/// Entity names share one namespace with the module's import locals.
#[derive(Debug, Clone, Default)]
pub struct BinaryBody {
    pub globals: Vec<GlobalDef>,
    pub memories: Vec<MemoryDef>,
    pub tables: Vec<TableDef>,
    pub functions: Vec<FuncDef>,
    pub data: Vec<DataSegment>,
    pub elements: Vec<ElementSegment>,
    pub start: Option<String>,
}

impl BinaryBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, name: &str, ty: GlobalType, init: GlobalInit) -> Self {
        self.globals.push(GlobalDef {
            name: name.to_string(),
            ty,
            init,
        });
        self
    }

    pub fn memory(mut self, name: &str, limits: Limits) -> Self {
        self.memories.push(MemoryDef {
            name: name.to_string(),
            limits,
        });
        self
    }

    pub fn table(mut self, name: &str, limits: Limits) -> Self {
        self.tables.push(TableDef {
            name: name.to_string(),
            limits,
        });
        self
    }

    pub fn func<F>(mut self, name: &str, ty: FuncType, code: F) -> Self
    where
        F: Fn(&Arc<ModuleEnvironment>, &[RawNum]) -> Result<Vec<RawNum>, EvalError>
            + Send
            + Sync
            + 'static,
    {
        self.functions.push(FuncDef {
            name: name.to_string(),
            ty,
            code: Arc::new(code),
        });
        self
    }

    pub fn data(mut self, memory: &str, offset: usize, bytes: &[u8]) -> Self {
        self.data.push(DataSegment {
            memory: memory.to_string(),
            offset,
            bytes: bytes.to_vec(),
        });
        self
    }

    pub fn elements(mut self, table: &str, offset: u32, functions: &[&str]) -> Self {
        self.elements.push(ElementSegment {
            table: table.to_string(),
            offset,
            functions: functions.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    pub fn start(mut self, function: &str) -> Self {
        self.start = Some(function.to_string());
        self
    }

    /// Kind and type of every entity the body defines, keyed by name
    fn definitions(&self) -> FxHashMap<&str, TypeSig> {
        let mut defs = FxHashMap::default();
        for g in &self.globals {
            defs.insert(g.name.as_str(), TypeSig::Numeric(g.ty));
        }
        for m in &self.memories {
            defs.insert(m.name.as_str(), TypeSig::Resource(ResourceKind::Memory, m.limits));
        }
        for t in &self.tables {
            defs.insert(t.name.as_str(), TypeSig::Resource(ResourceKind::Table, t.limits));
        }
        for f in &self.functions {
            defs.insert(f.name.as_str(), TypeSig::Function(f.ty.clone()));
        }
        defs
    }

    fn entity_count(&self) -> usize {
        self.globals.len() + self.memories.len() + self.tables.len() + self.functions.len()
    }
}

#[derive(Debug, Clone)]
pub enum ModuleBody {
    Script(ScriptBody),
    Binary(BinaryBody),
}

/// A parsed module
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Specifiers in request order
    pub requested_modules: Vec<String>,
    pub imports: Vec<ImportDecl>,
    pub exports: Vec<ExportDecl>,
    /// Specifiers of `export * from` clauses
    pub star_exports: Vec<String>,
    pub body: ModuleBody,
}

impl ModuleRecord {
    fn with_body(body: ModuleBody) -> Self {
        Self {
            requested_modules: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            star_exports: Vec::new(),
            body,
        }
    }

    pub fn script(body: ScriptBody) -> Self {
        Self::with_body(ModuleBody::Script(body))
    }

    pub fn binary(body: BinaryBody) -> Self {
        Self::with_body(ModuleBody::Binary(body))
    }

    pub fn kind(&self) -> ModuleKind {
        match self.body {
            ModuleBody::Script(_) => ModuleKind::Script,
            ModuleBody::Binary(_) => ModuleKind::Binary,
        }
    }

    /// Request a module without importing anything from it
    pub fn request(mut self, specifier: &str) -> Self {
        if !self.requested_modules.iter().any(|s| s == specifier) {
            self.requested_modules.push(specifier.to_string());
        }
        self
    }

    pub fn import(self, decl: ImportDecl) -> Self {
        let mut record = self.request(&decl.module);
        record.imports.push(decl);
        record
    }

    pub fn export(mut self, decl: ExportDecl) -> Self {
        if let ExportSource::Indirect { module, .. } = &decl.source {
            let module = module.clone();
            self = self.request(&module);
        }
        self.exports.push(decl);
        self
    }

    pub fn star_export(self, specifier: &str) -> Self {
        let mut record = self.request(specifier);
        record.star_exports.push(specifier.to_string());
        record
    }

    /// Check the record's static well-formedness
    ///
    /// Returns the message of the SyntaxError the loader reports.
    pub fn validate(&self) -> Result<(), String> {
        let requested: FxHashSet<&str> =
            self.requested_modules.iter().map(String::as_str).collect();
        let kind = self.kind();

        let mut locals = FxHashSet::default();
        for import in &self.imports {
            if !requested.contains(import.module.as_str()) {
                return Err(format!(
                    "import '{}' names module '{}' which is not requested",
                    import.local, import.module
                ));
            }
            if import.kind != import.ty.binding_kind() {
                return Err(format!(
                    "import '{}' declares kind {} but a {} type",
                    import.local,
                    import.kind,
                    import.ty.binding_kind()
                ));
            }
            if kind == ModuleKind::Binary && import.ty == TypeSig::None {
                return Err(format!("binary import '{}' has no declared type", import.local));
            }
            if kind == ModuleKind::Script && import.ty != TypeSig::None {
                return Err(format!("script import '{}' cannot declare a type", import.local));
            }
            if !locals.insert(import.local.as_str()) {
                return Err(format!("duplicate import binding '{}'", import.local));
            }
        }

        for specifier in &self.star_exports {
            if !requested.contains(specifier.as_str()) {
                return Err(format!("star export of '{}' which is not requested", specifier));
            }
        }

        let mut names = FxHashSet::default();
        for export in &self.exports {
            if !names.insert(export.name.as_str()) {
                return Err(format!("duplicate export name '{}'", export.name));
            }
            if export.kind != export.ty.binding_kind() {
                return Err(format!(
                    "export '{}' declares kind {} but a {} type",
                    export.name,
                    export.kind,
                    export.ty.binding_kind()
                ));
            }
        }

        match &self.body {
            ModuleBody::Script(_) => self.validate_script_exports(&locals),
            ModuleBody::Binary(body) => self.validate_binary(body),
        }
    }

    fn validate_script_exports(&self, import_locals: &FxHashSet<&str>) -> Result<(), String> {
        for export in &self.exports {
            if export.ty != TypeSig::None {
                return Err(format!("script export '{}' cannot declare a type", export.name));
            }
            match &export.source {
                ExportSource::Local(local) if import_locals.contains(local.as_str()) => {
                    return Err(format!(
                        "export '{}' names import binding '{}'; re-export it instead",
                        export.name, local
                    ));
                }
                ExportSource::Import(_) => {
                    return Err(format!(
                        "script export '{}' cannot re-export an import binding",
                        export.name
                    ));
                }
                ExportSource::Indirect { module, .. }
                    if !self.requested_modules.contains(module) =>
                {
                    return Err(format!(
                        "export '{}' re-exports from '{}' which is not requested",
                        export.name, module
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_binary(&self, body: &BinaryBody) -> Result<(), String> {
        let defs = body.definitions();
        if defs.len() != body.entity_count() {
            return Err("duplicate entity name in binary module".to_string());
        }

        let imports: FxHashMap<&str, &TypeSig> = self
            .imports
            .iter()
            .map(|i| (i.local.as_str(), &i.ty))
            .collect();
        if let Some(name) = defs.keys().find(|name| imports.contains_key(*name)) {
            return Err(format!("entity '{}' shadows an import", name));
        }

        let entity = |name: &str| defs.get(name).or_else(|| imports.get(name).copied());
        let expect = |name: &str, kind: BindingKind, what: &str| -> Result<(), String> {
            match entity(name) {
                Some(ty) if ty.binding_kind() == kind => Ok(()),
                Some(ty) => Err(format!(
                    "{} '{}' is a {}, not a {}",
                    what,
                    name,
                    ty.binding_kind(),
                    kind
                )),
                None => Err(format!("{} '{}' is not defined", what, name)),
            }
        };

        for global in &body.globals {
            if let GlobalInit::Const(value) = &global.init {
                if value.ty() != global.ty.value {
                    return Err(format!(
                        "global '{}' of type {} has a {} initializer",
                        global.name,
                        global.ty,
                        value.ty()
                    ));
                }
            }
            if let GlobalInit::Import(local) = &global.init {
                match imports.get(local.as_str()) {
                    Some(TypeSig::Numeric(ty)) if ty.value == global.ty.value => {}
                    _ => {
                        return Err(format!(
                            "global '{}' is initialized from '{}', not an imported {} global",
                            global.name, local, global.ty.value
                        ))
                    }
                }
            }
        }
        for segment in &body.data {
            expect(&segment.memory, BindingKind::Memory, "data segment memory")?;
        }
        for segment in &body.elements {
            expect(&segment.table, BindingKind::Table, "element segment table")?;
            for function in &segment.functions {
                expect(function, BindingKind::Function, "element")?;
            }
        }
        if let Some(start) = &body.start {
            expect(start, BindingKind::Function, "start function")?;
            if let Some(TypeSig::Function(ty)) = entity(start) {
                if *ty != FuncType::default() {
                    return Err(format!("start function '{}' must have type () -> ()", start));
                }
            }
        }

        for export in &self.exports {
            let (source, ty) = match &export.source {
                ExportSource::Local(local) => (local, defs.get(local.as_str())),
                ExportSource::Import(local) => (local, imports.get(local.as_str()).copied()),
                ExportSource::FunctionDeclaration(_) | ExportSource::Indirect { .. } => {
                    return Err(format!(
                        "binary export '{}' must name an entity or an import",
                        export.name
                    ))
                }
            };
            match ty {
                Some(ty) if *ty == export.ty => {}
                Some(ty) => {
                    return Err(format!(
                        "export '{}' declares {:?} but '{}' has type {:?}",
                        export.name, export.ty, source, ty
                    ))
                }
                None => {
                    return Err(format!(
                        "export '{}' names unknown entity '{}'",
                        export.name, source
                    ))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NumType;

    #[test]
    fn test_import_requests_module() {
        let record = ModuleRecord::script(ScriptBody::empty())
            .import(ImportDecl::value("./a.js", "x"))
            .import(ImportDecl::value("./a.js", "y"))
            .star_export("./b.js");
        assert_eq!(record.requested_modules, vec!["./a.js", "./b.js"]);
        assert_eq!(record.kind(), ModuleKind::Script);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_duplicate_export_rejected() {
        let record = ModuleRecord::script(ScriptBody::empty())
            .export(ExportDecl::local("x"))
            .export(ExportDecl::local("x"));
        assert!(record.validate().unwrap_err().contains("duplicate export"));
    }

    #[test]
    fn test_unrequested_import_rejected() {
        let mut record = ModuleRecord::script(ScriptBody::empty());
        record.imports.push(ImportDecl::value("./a.js", "x"));
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_binary_import_needs_type() {
        let record =
            ModuleRecord::binary(BinaryBody::new()).import(ImportDecl::value("./a.js", "x"));
        assert!(record.validate().unwrap_err().contains("no declared type"));
    }

    #[test]
    fn test_binary_exports_checked_against_entities() {
        let body = BinaryBody::new().global(
            "count",
            GlobalType::mutable(NumType::I32),
            GlobalInit::Const(RawNum::I32(5)),
        );
        let ok = ModuleRecord::binary(body.clone())
            .export(ExportDecl::global("count", GlobalType::mutable(NumType::I32)));
        assert!(ok.validate().is_ok());

        let wrong_type = ModuleRecord::binary(body.clone())
            .export(ExportDecl::global("count", GlobalType::immutable(NumType::I32)));
        assert!(wrong_type.validate().is_err());

        let unknown = ModuleRecord::binary(body)
            .export(ExportDecl::memory("mem", Limits::at_least(1)));
        assert!(unknown.validate().unwrap_err().contains("unknown entity"));
    }

    #[test]
    fn test_export_sources_per_kind() {
        let script = ModuleRecord::script(ScriptBody::empty())
            .export(ExportDecl::local("x").with_source(ExportSource::Import("y".into())));
        assert!(script.validate().is_err());

        let binary = ModuleRecord::binary(BinaryBody::new())
            .export(ExportDecl::reexport("x", "./a.js", "x"));
        assert!(binary.validate().is_err());
    }

    #[test]
    fn test_binary_reexport_of_import() {
        let ty = GlobalType::immutable(NumType::F64);
        let record = ModuleRecord::binary(BinaryBody::new())
            .import(ImportDecl::global("./a.js", "pi", ty))
            .export(ExportDecl::global("pi", ty).with_source(ExportSource::Import("pi".into())));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_start_function_signature() {
        let body = BinaryBody::new()
            .func("init", FuncType::new(&[NumType::I32], &[]), |_, _| Ok(Vec::new()))
            .start("init");
        assert!(ModuleRecord::binary(body).validate().unwrap_err().contains("() -> ()"));
    }

    #[test]
    fn test_segments_reference_entities() {
        let body = BinaryBody::new().data("mem", 0, b"hi");
        assert!(ModuleRecord::binary(body).validate().is_err());

        let body = BinaryBody::new()
            .table("tbl", Limits::at_least(1))
            .func("f", FuncType::default(), |_, _| Ok(Vec::new()))
            .elements("tbl", 0, &["f"]);
        assert!(ModuleRecord::binary(body).validate().is_ok());
    }
}
