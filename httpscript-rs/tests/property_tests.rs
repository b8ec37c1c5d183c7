use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::Value;

use httpscript::{
    BufferSink, Config, DirLoader, ErrorKind, ExecutionResult, MockHttpClient, Script,
    ScriptEvaluator, ScriptLoader,
};

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

fn run_source(source: &str) -> ExecutionResult {
    let script = Script::new("prop", source);
    block_on(ScriptEvaluator::default().run(
        &script,
        Arc::new(MockHttpClient::new()),
        Arc::new(BufferSink::new()),
    ))
}

/// Every bundled script under `lib/scripts/` compiles.
#[test]
fn all_lib_scripts_compile() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).parent().unwrap().join("lib/scripts");
    let loader = DirLoader::new(&dir);
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("lua"))
        .collect();
    entries.sort();
    assert!(!entries.is_empty());

    let lua = mlua::Lua::new();
    for path in &entries {
        let name = path.file_stem().unwrap().to_str().unwrap();
        let script = loader.load(name).unwrap();
        if let Err(e) = lua.load(script.source()).into_function() {
            panic!("{name}.lua does not compile: {e}");
        }
    }
}

/// JSON values without floats, which survive the trip through Lua exactly.
fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever the entry function returns is the success payload.
    #[test]
    fn returned_value_is_the_payload(value in json_value()) {
        let source = format!("return function() return json.decode([==[{value}]==]) end");
        prop_assert_eq!(run_source(&source), ExecutionResult::success(value));
    }

    /// An uncaught error is always a ScriptError carrying its message.
    #[test]
    fn thrown_errors_keep_their_message(msg in "[a-zA-Z0-9 _-]{1,24}") {
        let source = format!("return function() error('{msg}') end");
        let result = run_source(&source);
        prop_assert_eq!(result.kind(), Some(ErrorKind::ScriptError));
        prop_assert!(result.message().unwrap().contains(&msg));
    }
}

proptest! {
    /// The config parser reports problems instead of panicking, and never
    /// reports more problems than there are lines.
    #[test]
    fn config_parser_does_not_panic(s in "\\PC*") {
        let (_, errors) = Config::load_str(&s);
        prop_assert!(errors.len() <= s.lines().count());
    }

    /// Identifiers cannot reach files outside the loader root.
    #[test]
    fn dir_loader_stays_inside_root(
        parts in prop::collection::vec(
            prop_oneof![Just(".."), Just("."), Just("inside"), Just("secret"), Just(""), Just("/")],
            1..5,
        )
    ) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("scripts");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("inside.lua"), "inside").unwrap();
        std::fs::write(dir.path().join("secret.lua"), "secret").unwrap();

        let id = parts.join("/");
        if let Ok(script) = DirLoader::new(&root).load(&id) {
            prop_assert_eq!(script.source(), "inside");
        }
    }
}
