//! Bytecode -> Interpreter integration tests
//!
//! Compiled modules produced by the code generator are executed by the VM,
//! including modules restored from a bytecode cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytecode_system::CompiledTemplate;
use core_types::{ErrorKind, Result, Value};
use environment::{Environment, FunctionLoader, MemoryBytecodeCache, TemplateSource};
use futures::StreamExt;
use serde_json::json;

fn page_loader(loads: Arc<AtomicUsize>) -> FunctionLoader {
    FunctionLoader::new(move |name| {
        loads.fetch_add(1, Ordering::SeqCst);
        match name {
            "page.html" => Some(TemplateSource::new(
                "{% extends 'base.html' %}{% block body %}{{ greeting | upper }}{% endblock %}",
            )),
            "base.html" => Some(TemplateSource::new("<main>{% block body %}{% endblock %}</main>")),
            _ => None,
        }
    })
}

/// Test: a module restored from the bytecode cache renders the same output
#[test]
fn test_cached_bytecode_renders_identically() {
    let cache = Arc::new(MemoryBytecodeCache::new());
    let loads = Arc::new(AtomicUsize::new(0));

    let first = Environment::builder()
        .loader(page_loader(loads.clone()))
        .bytecode_cache(cache.clone())
        .build()
        .unwrap();
    let context = Value::from_json(json!({"greeting": "hi"}));
    let expected = first.get_template("page.html").unwrap().render(context.clone()).unwrap();
    assert_eq!(expected, "<main>HI</main>");
    assert_eq!(cache.len(), 2);

    let second = Environment::builder()
        .loader(page_loader(loads.clone()))
        .bytecode_cache(cache.clone())
        .build()
        .unwrap();
    assert_eq!(second.get_template("page.html").unwrap().render(context).unwrap(), expected);
    assert_eq!(cache.len(), 2);
    assert_eq!(loads.load(Ordering::SeqCst), 4);
}

/// Test: a serialized module executes after deserialization
#[test]
fn test_blob_executes_after_round_trip() {
    let env = Environment::new();
    let code = env.compile("{% for i in range(3) %}{{ i }}{% endfor %}", Some("loop"), None).unwrap();
    let restored = CompiledTemplate::from_bytes(&code.to_bytes().unwrap()).unwrap();
    assert_eq!(restored, code);

    let listing = restored.disassemble();
    assert!(listing.contains("EMIT"));
    assert!(listing.contains("== "));
}

/// Test: output arrives in several chunks that join to the full render
#[test]
fn test_vm_streams_chunks() {
    let env = Environment::new();
    let tmpl = env.from_string("a{% for i in [1, 2, 3] %}-{{ i }}{% endfor %}z").unwrap();
    let chunks: Vec<String> = tmpl.generate(()).unwrap().collect::<Result<_>>().unwrap();
    assert!(chunks.len() > 1);
    assert_eq!(chunks.concat(), "a-1-2-3z");
}

/// Test: async rendering awaits host functions between instructions
#[test]
fn test_vm_async_stream() {
    use futures::FutureExt;

    let fetch = core_types::Function::new_async("fetch", |args: Vec<Value>, _: core_types::Kwargs| {
        let key = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        async move { Ok(Value::from(format!("<{}>", key))) }.boxed()
    });
    let env = Environment::builder()
        .enable_async(true)
        .global("fetch", fetch)
        .build()
        .unwrap();
    let tmpl = env.from_string("{% for k in ['a', 'b'] %}{{ fetch(k) }}{% endfor %}").unwrap();
    let chunks: Vec<Result<String>> =
        futures::executor::block_on(tmpl.generate_async(()).unwrap().collect());
    let out: String = chunks.into_iter().collect::<Result<Vec<_>>>().unwrap().concat();
    assert_eq!(out, "<a><b>");
}

/// Test: runtime errors carry a traceback through included templates
#[test]
fn test_runtime_error_traceback() {
    let env = Environment::builder()
        .loader(FunctionLoader::new(|name| match name {
            "outer.html" => Some(TemplateSource::new("start\n{% include 'inner.html' %}")),
            "inner.html" => Some(TemplateSource::new("\n\n{{ 1 // 0 }}")),
            _ => None,
        }))
        .build()
        .unwrap();
    let err = env.get_template("outer.html").unwrap().render(()).unwrap_err();
    assert!(!err.stack.is_empty());
    let traceback = err.traceback();
    assert!(traceback.starts_with("Traceback (most recent call last):"));
    assert!(traceback.contains("inner.html"));
    assert!(traceback.contains("line 3"));
}

/// Test: calling a non-callable is a type error at runtime, not compile time
#[test]
fn test_call_non_callable() {
    let env = Environment::new();
    let tmpl = env.from_string("{{ x() }}").unwrap();
    let err = tmpl.render(Value::from_json(json!({"x": 3}))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}
