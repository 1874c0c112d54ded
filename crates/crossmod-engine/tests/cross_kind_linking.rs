//! Cross-kind import scenarios between Script and Binary modules

use crossmod_engine::{
    BinaryBody, Engine, Error, EvalError, ExportDecl, ExportSource, FuncType, GlobalInit,
    GlobalType, ImportDecl, Incompatibility, LinkError, Limits, MapResolver, MemoryLoader,
    ModuleRecord, NumType, RawNum, ScriptBody, SlotState, Value,
};

fn engine(loader: MemoryLoader) -> Engine {
    Engine::new(MapResolver::new(), loader)
}

fn counter_script() -> ModuleRecord {
    ModuleRecord::script(ScriptBody::empty())
        .export(ExportDecl::function_declaration("getCount", |_, _| Ok(Value::Number(42.0))))
}

// ============================================================================
// Script exports consumed by Binary imports
// ============================================================================

#[test]
fn test_binary_calls_script_function() {
    let loader = MemoryLoader::new().with("/counter.js", counter_script()).with(
        "/main.wasm",
        ModuleRecord::binary(BinaryBody::new()).import(ImportDecl::function(
            "./counter.js",
            "getCount",
            FuncType::new(&[], &[NumType::I32]),
        )),
    );
    let engine = engine(loader);
    engine.run("./main.wasm").unwrap();

    let env = engine.environment("/main.wasm").unwrap();
    assert_eq!(env.invoke("getCount", &[]).unwrap(), vec![RawNum::I32(42)]);
    assert!(env.func("getCount").unwrap().is_binary());
}

#[test]
fn test_binary_reexports_adapted_function() {
    let ty = FuncType::new(&[], &[NumType::I32]);
    let loader = MemoryLoader::new().with("/counter.js", counter_script()).with(
        "/main.wasm",
        ModuleRecord::binary(BinaryBody::new())
            .import(ImportDecl::function("./counter.js", "getCount", ty.clone()))
            .export(
                ExportDecl::function("count", ty)
                    .with_source(ExportSource::Import("getCount".into())),
            ),
    );
    let engine = engine(loader);
    let ns = engine.run("./main.wasm").unwrap();

    let exported = ns.get("count").unwrap();
    let function = exported.as_function().unwrap();
    assert_eq!(function.call(&[]).unwrap(), Value::Number(42.0));
    let installed = engine.environment("/main.wasm").unwrap().func("getCount").unwrap();
    assert!(function.ptr_eq(&installed));
}

#[test]
fn test_plain_number_satisfies_immutable_global() {
    let loader = MemoryLoader::new()
        .with(
            "/count.js",
            ModuleRecord::script(ScriptBody::new(|env| env.set("count", 42.0)))
                .export(ExportDecl::local("count")),
        )
        .with(
            "/main.wasm",
            ModuleRecord::binary(BinaryBody::new()).import(ImportDecl::global(
                "./count.js",
                "count",
                GlobalType::immutable(NumType::I32),
            )),
        );
    let engine = engine(loader);
    engine.run("./main.wasm").unwrap();

    let global = engine.environment("/main.wasm").unwrap().global("count").unwrap();
    assert_eq!(global.get(), RawNum::I32(42));
    assert_eq!(global.ty(), GlobalType::immutable(NumType::I32));
    assert!(global.set(RawNum::I32(1)).is_err());
}

#[test]
fn test_plain_number_rejected_for_mutable_global() {
    let loader = MemoryLoader::new()
        .with(
            "/count.js",
            ModuleRecord::script(ScriptBody::new(|env| env.set("count", 42.0)))
                .export(ExportDecl::local("count")),
        )
        .with(
            "/main.wasm",
            ModuleRecord::binary(BinaryBody::new()).import(ImportDecl::global(
                "./count.js",
                "count",
                GlobalType::mutable(NumType::I32),
            )),
        );
    let engine = engine(loader);

    match engine.run("./main.wasm") {
        Err(Error::Eval(EvalError::LinkType(err))) => {
            assert_eq!(err.module, "/main.wasm");
            assert_eq!(err.from, "/count.js");
            assert_eq!(err.name, "count");
            assert_eq!(
                err.reason,
                Incompatibility::MutableFromPlainValue {
                    expected: GlobalType::mutable(NumType::I32)
                }
            );
        }
        other => panic!(
            "expected LinkTypeError, got {:?}",
            other.map(|ns| ns.module().to_string())
        ),
    }
    assert!(engine.module_state("/main.wasm").unwrap().is_errored());
    // The exporter completed before the importer observed it
    assert!(engine.module_state("/count.js").unwrap().is_completed());
}

#[test]
fn test_boxed_global_binds_by_identity() {
    let loader = MemoryLoader::new()
        .with(
            "/state.wasm",
            ModuleRecord::binary(BinaryBody::new().global(
                "level",
                GlobalType::mutable(NumType::I64),
                GlobalInit::Const(RawNum::I64(7)),
            ))
            .export(ExportDecl::global("level", GlobalType::mutable(NumType::I64))),
        )
        .with(
            "/bridge.js",
            ModuleRecord::script(ScriptBody::empty())
                .export(ExportDecl::reexport("level", "./state.wasm", "level")),
        )
        .with(
            "/main.wasm",
            ModuleRecord::binary(BinaryBody::new()).import(ImportDecl::global(
                "./bridge.js",
                "level",
                GlobalType::mutable(NumType::I64),
            )),
        );
    let engine = engine(loader);
    engine.run("./main.wasm").unwrap();

    let imported = engine.environment("/main.wasm").unwrap().global("level").unwrap();
    let exported = engine.environment("/state.wasm").unwrap().global("level").unwrap();
    assert!(imported.ptr_eq(&exported));
    exported.set(RawNum::I64(8)).unwrap();
    assert_eq!(imported.get(), RawNum::I64(8));
}

#[test]
fn test_non_callable_rejected_for_function_import() {
    let loader = MemoryLoader::new()
        .with(
            "/lib.js",
            ModuleRecord::script(ScriptBody::new(|env| env.set("run", Value::string("nope"))))
                .export(ExportDecl::local("run")),
        )
        .with(
            "/main.wasm",
            ModuleRecord::binary(BinaryBody::new()).import(ImportDecl::function(
                "./lib.js",
                "run",
                FuncType::new(&[], &[]),
            )),
        );

    match engine(loader).run("./main.wasm") {
        Err(Error::Eval(EvalError::LinkType(err))) => {
            assert_eq!(err.reason, Incompatibility::NotCallable { actual: "string" });
        }
        other => panic!(
            "expected LinkTypeError, got {:?}",
            other.map(|ns| ns.module().to_string())
        ),
    }
}

// ============================================================================
// Binary exports consumed by Script imports
// ============================================================================

fn counter_binary() -> ModuleRecord {
    ModuleRecord::binary(
        BinaryBody::new()
            .global("count", GlobalType::mutable(NumType::I32), GlobalInit::Const(RawNum::I32(5)))
            .func("increment", FuncType::new(&[], &[]), |env, _| {
                let count = env.global("count")?;
                let next = count.get().as_i32().unwrap_or_default() + 1;
                count.set(RawNum::I32(next))?;
                Ok(Vec::new())
            }),
    )
    .export(ExportDecl::global("count", GlobalType::mutable(NumType::I32)))
    .export(ExportDecl::function("increment", FuncType::new(&[], &[])))
}

#[test]
fn test_script_observes_binary_global_mutation() {
    let loader = MemoryLoader::new().with("/counter.wasm", counter_binary()).with(
        "/main.js",
        ModuleRecord::script(ScriptBody::new(|env| {
            env.call("increment", &[])?;
            let count = env.import("count")?;
            let global = count
                .as_global()
                .ok_or_else(|| EvalError::thrown("count is not a global object"))?;
            env.set("seen", global.value())
        }))
        .import(ImportDecl::value("./counter.wasm", "count"))
        .import(ImportDecl::value("./counter.wasm", "increment"))
        .export(ExportDecl::local("seen")),
    );
    let engine = engine(loader);
    let ns = engine.run("./main.js").unwrap();

    assert_eq!(ns.get("seen").unwrap(), Value::Number(6.0));
    let env = engine.environment("/main.js").unwrap();
    let count = env.import("count").unwrap();
    assert_eq!(count.as_global().unwrap().get(), RawNum::I32(6));

    let binding = env.import_binding("count").unwrap();
    assert_eq!(binding.local.state(), SlotState::Snapshot);
}

#[test]
fn test_script_cannot_assign_import() {
    let loader = MemoryLoader::new().with("/counter.wasm", counter_binary()).with(
        "/main.js",
        ModuleRecord::script(ScriptBody::new(|env| env.set("count", 1.0)))
            .import(ImportDecl::value("./counter.wasm", "count")),
    );

    assert!(matches!(
        engine(loader).run("./main.js"),
        Err(Error::Eval(EvalError::Type(_)))
    ));
}

#[test]
fn test_script_passes_numbers_to_binary_function() {
    let loader = MemoryLoader::new()
        .with(
            "/math.wasm",
            ModuleRecord::binary(BinaryBody::new().func(
                "add",
                FuncType::new(&[NumType::I32, NumType::I32], &[NumType::I32]),
                |_, args| match args {
                    [RawNum::I32(a), RawNum::I32(b)] => Ok(vec![RawNum::I32(a.wrapping_add(*b))]),
                    _ => Err(EvalError::thrown("bad arguments")),
                },
            ))
            .export(ExportDecl::function(
                "add",
                FuncType::new(&[NumType::I32, NumType::I32], &[NumType::I32]),
            )),
        )
        .with(
            "/main.js",
            ModuleRecord::script(ScriptBody::new(|env| {
                // 2.9 truncates to 2 on the way in
                let sum = env.call("add", &[Value::Number(2.9), Value::Number(40.0)])?;
                env.set("sum", sum)
            }))
            .import(ImportDecl::value("./math.wasm", "add"))
            .export(ExportDecl::local("sum")),
        );

    let ns = engine(loader).run("./main.js").unwrap();
    assert_eq!(ns.get("sum").unwrap(), Value::Number(42.0));
}

// ============================================================================
// Binary to Binary
// ============================================================================

#[test]
fn test_binary_memory_limits_checked_at_link() {
    let loader = MemoryLoader::new()
        .with(
            "/heap.wasm",
            ModuleRecord::binary(BinaryBody::new().memory("heap", Limits::at_least(1)))
                .export(ExportDecl::memory("heap", Limits::at_least(1))),
        )
        .with(
            "/main.wasm",
            ModuleRecord::binary(BinaryBody::new()).import(ImportDecl::memory(
                "./heap.wasm",
                "heap",
                Limits::new(2, Some(4)),
            )),
        );
    let engine = engine(loader);

    match engine.run("./main.wasm") {
        Err(Error::Link(LinkError::LinkType(err))) => {
            assert!(matches!(err.reason, Incompatibility::Limits { .. }));
        }
        other => panic!(
            "expected LinkTypeError, got {:?}",
            other.map(|ns| ns.module().to_string())
        ),
    }
    // Nothing was instantiated
    assert!(!engine.module_state("/heap.wasm").unwrap().is_completed());
}

#[test]
fn test_binary_shares_memory_with_binary() {
    let loader = MemoryLoader::new()
        .with(
            "/heap.wasm",
            ModuleRecord::binary(
                BinaryBody::new()
                    .memory("heap", Limits::new(1, Some(2)))
                    .data("heap", 8, &[1, 2, 3, 4]),
            )
            .export(ExportDecl::memory("heap", Limits::new(1, Some(2)))),
        )
        .with(
            "/main.wasm",
            ModuleRecord::binary(
                BinaryBody::new()
                    .func("poke", FuncType::new(&[], &[]), |env, _| {
                        env.memory("heap")?.store_i32(0, 99)?;
                        Ok(Vec::new())
                    })
                    .start("poke"),
            )
            .import(ImportDecl::memory("./heap.wasm", "heap", Limits::at_least(1))),
        );
    let engine = engine(loader);
    engine.run("./main.wasm").unwrap();

    let heap = engine.environment("/heap.wasm").unwrap().memory("heap").unwrap();
    assert_eq!(heap.load_i32(0).unwrap(), 99);
    assert_eq!(heap.read(8, 4).unwrap(), vec![1, 2, 3, 4]);
    assert!(heap.ptr_eq(&engine.environment("/main.wasm").unwrap().memory("heap").unwrap()));
}
