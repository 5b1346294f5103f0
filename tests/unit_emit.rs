//! Persistence tests: every output format, reloading saved IR, and the
//! textual forms returned by `get_source`.

use object::{Object, ObjectSymbol};

use llvm_unit::llvm::MAIN_SYMBOL;
use llvm_unit::{
    CompiledUnit, IrSource, LoweredFunction, OutputFormat, PackedArgs, PackedBody, PackedFn,
    UnitError, UnitResult,
};

fn negate_body(body: &PackedBody<'_, '_>) -> UnitResult<()> {
    body.expect_args(1)?;
    let x = body.arg_i64(0)?;
    let neg = body.builder().build_int_neg(x, "neg")?;
    body.store_i64(0, neg)?;
    body.ret_ok()
}

fn negate_unit() -> Vec<Box<dyn LoweredFunction>> {
    vec![Box::new(PackedFn::new("negate", negate_body))]
}

#[test]
fn test_object_file_exports_functions() {
    let unit = CompiledUnit::init(&negate_unit(), "llvm").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("negate.o");

    unit.save_to_file(&path, "").unwrap();
    let bytes = std::fs::read(&path).unwrap();
    let obj = object::File::parse(&*bytes).expect("valid object file");

    let names: Vec<&str> = obj.symbols().filter_map(|s| s.name().ok()).collect();
    assert!(
        names.iter().any(|n| n.trim_start_matches('_') == "negate"),
        "symbols: {names:?}"
    );
    assert!(names.iter().any(|n| n.trim_start_matches('_') == MAIN_SYMBOL.trim_start_matches('_')));
    assert!(!unit.is_built());
}

#[test]
fn test_explicit_format_overrides_extension() {
    let unit = CompiledUnit::init(&negate_unit(), "llvm").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("negate.ll");

    unit.save_to_file(&path, "bc").unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], b"BC\xC0\xDE");
}

fn double_body(body: &PackedBody<'_, '_>) -> UnitResult<()> {
    body.expect_args(1)?;
    let x = body.arg_i64(0)?;
    let twice = body.builder().build_int_add(x, x, "twice")?;
    body.store_i64(0, twice)?;
    body.ret_ok()
}

#[test]
fn test_textual_ir_reloads() {
    let functions: Vec<Box<dyn LoweredFunction>> = vec![
        Box::new(PackedFn::new("negate", negate_body)),
        Box::new(PackedFn::new("double", double_body)),
    ];
    let unit = CompiledUnit::init(&functions, "llvm").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arith.ll");
    unit.save_to_file(&path, "").unwrap();

    let source = IrSource::from_file(&path).unwrap();
    assert_eq!(source.name(), "negate");
    assert!(source.text().contains(MAIN_SYMBOL));

    let reloaded = CompiledUnit::init(&[Box::new(source) as Box<dyn LoweredFunction>], "llvm")
        .unwrap();
    assert_eq!(reloaded.entry_point(), unit.entry_point());
    assert_eq!(reloaded.function_names(), unit.function_names());
    assert_eq!(reloaded.function_names(), &["negate", "double"]);

    let negate = reloaded.get_function("negate").unwrap().unwrap();
    let mut args = PackedArgs::new();
    args.push_int(17);
    negate.call(&mut args).unwrap();
    assert_eq!(args.int(0), Some(-17));

    let double = reloaded.get_function("double").unwrap().unwrap();
    let mut args = PackedArgs::new();
    args.push_int(21);
    double.call(&mut args).unwrap();
    assert_eq!(args.int(0), Some(42));
}

#[test]
fn test_source_formats() {
    let unit = CompiledUnit::init(&negate_unit(), "llvm").unwrap();

    let ir = unit.get_source("").unwrap();
    assert_eq!(ir, unit.get_source("ll").unwrap());
    assert!(ir.contains("define i32 @negate(ptr"));
    assert!(ir.contains("target datalayout"));

    let asm = unit.get_source("s").unwrap();
    assert!(asm.contains("negate"));
    assert_eq!(asm, unit.get_source("asm").unwrap());

    assert_eq!(
        unit.get_source("o").unwrap_err(),
        UnitError::UnsupportedFormat { format: "o".into() }
    );
}

#[test]
fn test_emit_counts_artifacts() {
    let unit = CompiledUnit::init(&negate_unit(), "llvm").unwrap();
    let obj = unit.emit(OutputFormat::Object).unwrap();
    let bc = unit.emit(OutputFormat::Bitcode).unwrap();
    assert!(!obj.is_empty());
    assert_eq!(&bc[..4], b"BC\xC0\xDE");
    assert_eq!(unit.stats().artifacts_emitted, 2);
}

#[test]
fn test_cross_target_object() {
    let unit = CompiledUnit::init(&negate_unit(), "llvm -mtriple=aarch64-unknown-linux-gnu")
        .unwrap();
    assert_eq!(unit.target().cpu(), "generic");

    let bytes = unit.emit(OutputFormat::Object).unwrap();
    let obj = object::File::parse(&*bytes).unwrap();
    assert_eq!(obj.architecture(), object::Architecture::Aarch64);
}

#[test]
fn test_write_into_missing_directory() {
    let unit = CompiledUnit::init(&negate_unit(), "llvm").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no_such_dir").join("negate.o");

    let err = unit.save_to_file(&path, "").unwrap_err();
    assert!(matches!(err, UnitError::Io { .. }));
    assert!(err.to_string().contains("no_such_dir"));
}
