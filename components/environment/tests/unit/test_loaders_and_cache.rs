//! Unit tests for loaders and the bytecode cache

use std::sync::Arc;

use core_types::ErrorKind;
use environment::{
    BytecodeCache, ChoiceLoader, DictLoader, Environment, FileSystemBytecodeCache, FileSystemLoader,
    FunctionLoader, Loader, MemoryBytecodeCache, PrefixLoader, TemplateSource,
};

fn write(dir: &std::path::Path, name: &str, source: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, source).unwrap();
}

#[test]
fn test_filesystem_loader_finds_nested_templates() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "layout.html", "[{% block body %}{% endblock %}]");
    write(dir.path(), "pages/index.html", "{% extends 'layout.html' %}{% block body %}index{% endblock %}");

    let env = Environment::builder()
        .loader(FileSystemLoader::new([dir.path()]))
        .build()
        .unwrap();
    let tmpl = env.get_template("pages/index.html").unwrap();
    assert_eq!(tmpl.render(()).unwrap(), "[index]");
    assert!(tmpl.filename().unwrap().ends_with("index.html"));
    assert_eq!(env.list_templates(None).unwrap(), ["layout.html", "pages/index.html"]);
}

#[test]
fn test_filesystem_loader_search_path_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write(first.path(), "a.txt", "first");
    write(second.path(), "a.txt", "second");
    write(second.path(), "b.txt", "only second");

    let env = Environment::builder()
        .loader(FileSystemLoader::new([first.path(), second.path()]))
        .build()
        .unwrap();
    assert_eq!(env.get_template("a.txt").unwrap().render(()).unwrap(), "first");
    assert_eq!(env.get_template("b.txt").unwrap().render(()).unwrap(), "only second");
}

#[test]
fn test_filesystem_loader_rejects_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let env = Environment::builder()
        .loader(FileSystemLoader::new([dir.path().join("inner")]))
        .build()
        .unwrap();
    write(dir.path(), "secret.txt", "secret");
    let err = env.get_template("../secret.txt").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TemplateNotFound);
}

#[test]
fn test_filesystem_template_goes_stale_on_write() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "t.txt", "v1");
    let env = Environment::builder()
        .loader(FileSystemLoader::new([dir.path()]))
        .build()
        .unwrap();
    let tmpl = env.get_template("t.txt").unwrap();
    assert!(tmpl.is_up_to_date());

    std::fs::remove_file(dir.path().join("t.txt")).unwrap();
    assert!(!tmpl.is_up_to_date());
}

#[test]
fn test_prefix_and_choice_loaders() {
    let app: Arc<dyn Loader> = Arc::new(DictLoader::new([("index", "app index")]));
    let admin: Arc<dyn Loader> = Arc::new(DictLoader::new([("index", "admin index")]));
    let prefixed: Arc<dyn Loader> = Arc::new(PrefixLoader::new([
        ("app".to_string(), app),
        ("admin".to_string(), admin),
    ]));
    let fallback: Arc<dyn Loader> = Arc::new(FunctionLoader::new(|name| {
        (name == "special").then(|| TemplateSource::new("from function"))
    }));

    let env = Environment::builder()
        .loader(ChoiceLoader::new(vec![prefixed, fallback]))
        .build()
        .unwrap();
    assert_eq!(env.get_template("admin/index").unwrap().render(()).unwrap(), "admin index");
    assert_eq!(env.get_template("app/index").unwrap().render(()).unwrap(), "app index");
    assert_eq!(env.get_template("special").unwrap().render(()).unwrap(), "from function");

    let err = env.get_template("app/missing").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TemplateNotFound);
    assert_eq!(env.list_templates(None).unwrap_err().kind, ErrorKind::TypeError);
}

#[test]
fn test_function_loader_cannot_list() {
    let env = Environment::builder()
        .loader(FunctionLoader::new(|_| None))
        .build()
        .unwrap();
    assert_eq!(env.list_templates(None).unwrap_err().kind, ErrorKind::TypeError);
}

#[test]
fn test_bytecode_cache_is_filled_and_reused() {
    let cache = Arc::new(MemoryBytecodeCache::new());
    let loader = DictLoader::new([("t", "{{ 1 + x }}")]);
    let env = Environment::builder()
        .loader(loader.clone())
        .bytecode_cache(cache.clone())
        .build()
        .unwrap();
    let out = env.get_template("t").unwrap().render(core_types::Value::from_json(serde_json::json!({"x": 1})));
    assert_eq!(out.unwrap(), "2");
    assert_eq!(cache.len(), 1);

    let second = Environment::builder()
        .loader(loader.clone())
        .bytecode_cache(cache.clone())
        .build()
        .unwrap();
    let bucket = cache.get_bucket("t", None, "{{ 1 + x }}").unwrap();
    assert!(bucket.code().is_some());
    let out = second.get_template("t").unwrap().render(core_types::Value::from_json(serde_json::json!({"x": 2})));
    assert_eq!(out.unwrap(), "3");

    // Changed source invalidates the stored module.
    loader.insert("t", "changed");
    let stale = cache.get_bucket("t", None, "changed").unwrap();
    assert!(stale.code().is_none());
    assert_eq!(second.get_template("t").unwrap().render(()).unwrap(), "changed");
}

#[test]
fn test_filesystem_bytecode_cache_round_trip() {
    let templates = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    write(templates.path(), "page.txt", "{% for i in range(3) %}{{ i }}{% endfor %}");

    let build = || {
        Environment::builder()
            .loader(FileSystemLoader::new([templates.path()]))
            .bytecode_cache(Arc::new(FileSystemBytecodeCache::new(cache_dir.path())))
            .build()
            .unwrap()
    };
    assert_eq!(build().get_template("page.txt").unwrap().render(()).unwrap(), "012");
    let stored: Vec<_> = std::fs::read_dir(cache_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].starts_with("__ctpl_") && stored[0].ends_with(".cache"));

    // Corrupt blobs are ignored and overwritten.
    std::fs::write(cache_dir.path().join(&stored[0]), b"garbage").unwrap();
    assert_eq!(build().get_template("page.txt").unwrap().render(()).unwrap(), "012");
    assert!(std::fs::read(cache_dir.path().join(&stored[0])).unwrap().starts_with(b"CTPL"));

    FileSystemBytecodeCache::new(cache_dir.path()).clear().unwrap();
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}
