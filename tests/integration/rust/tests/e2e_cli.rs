//! End-to-End CLI Integration Tests
//!
//! Tests the template engine through the template_cli Runner API against a
//! small site on disk. This is the highest level integration test: files and
//! a JSON context in, rendered text out.

use std::path::Path;

use template_cli::{Cli, CliError, DumpTarget, Runner};
use tempfile::TempDir;

fn write(root: &Path, name: &str, contents: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

fn site() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "layout/base.html",
        "<title>{% block title %}Site{% endblock %}</title>\n<body>{% block body %}{% endblock %}</body>\n",
    );
    write(
        root,
        "macros/forms.html",
        "{% macro input(name, value='') %}<input name=\"{{ name }}\" value=\"{{ value }}\">{% endmacro %}",
    );
    write(root, "partials/item.html", "<li>{{ item.name }}: {{ item.price | round(2) }}</li>");
    write(
        root,
        "shop.html",
        "{% extends 'layout/base.html' %}\
         {% import 'macros/forms.html' as forms %}\
         {% block title %}{{ shop }} - {{ super() }}{% endblock %}\
         {% block body %}<ul>{% for item in items | sort(attribute='price') %}{% include 'partials/item.html' %}{% endfor %}</ul>\
         {{ forms.input('q', query) }}{% endblock %}",
    );
    write(
        root,
        "ctx.json",
        r#"{"shop": "Corner", "query": "<tea>", "items": [{"name": "tea", "price": 3.456}, {"name": "jam", "price": 1.5}]}"#,
    );
    dir
}

fn cli(dir: &TempDir, extra: &[&str]) -> Cli {
    use clap::Parser;

    let mut args = vec![
        "corten-tmpl".to_string(),
        "-I".to_string(),
        dir.path().to_string_lossy().into_owned(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    Cli::try_parse_from(args).unwrap()
}

/// Test: inheritance, imports, includes and filters render from disk
#[test]
fn test_e2e_render_site() {
    let dir = site();
    let ctx = dir.path().join("ctx.json").to_string_lossy().into_owned();
    let args = cli(&dir, &["--autoescape", "-c", &ctx, "shop.html"]);
    let out = Runner::from_cli(&args).unwrap().run(&args).unwrap();
    assert_eq!(
        out,
        "<title>Corner - Site</title>\n<body><ul><li>jam: 1.5</li><li>tea: 3.46</li></ul>\
         <input name=\"q\" value=\"&lt;tea&gt;\"></body>"
    );
}

/// Test: the trailing newline is dropped unless configured otherwise
#[test]
fn test_e2e_trailing_newline() {
    let dir = site();
    let runner = Runner::new(&[dir.path().to_path_buf()]).unwrap();
    let out = runner.render("layout/base.html", core_types::Value::None).unwrap();
    assert!(out.ends_with("</body>"));
}

/// Test: a missing template maps to the template error exit code
#[test]
fn test_e2e_missing_template() {
    let dir = site();
    let args = cli(&dir, &["nope.html"]);
    let err = Runner::from_cli(&args).unwrap().run(&args).unwrap_err();
    match &err {
        CliError::Template(inner) => assert_eq!(inner.kind, core_types::ErrorKind::TemplateNotFound),
        other => panic!("expected template error, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 1);
}

/// Test: path traversal outside the search path is refused
#[test]
fn test_e2e_traversal_refused() {
    let dir = site();
    let runner = Runner::new(&[dir.path().join("partials")]).unwrap();
    assert!(runner.render("../shop.html", core_types::Value::None).is_err());
}

/// Test: trim_blocks from the command line removes block newlines
#[test]
fn test_e2e_trim_blocks_flag() {
    let dir = site();
    write(dir.path(), "list.html", "{% for i in [1, 2] %}\n{{ i }}\n{% endfor %}\n");
    let args = cli(&dir, &["--trim-blocks", "list.html"]);
    assert_eq!(Runner::from_cli(&args).unwrap().run(&args).unwrap(), "1\n2\n");

    let args = cli(&dir, &["list.html"]);
    assert_eq!(Runner::from_cli(&args).unwrap().run(&args).unwrap(), "\n1\n\n2\n");
}

/// Test: every dump target produces text for a loaded template
#[test]
fn test_e2e_dump_targets() {
    let dir = site();
    let runner = Runner::new(&[dir.path().to_path_buf()]).unwrap();
    for target in [DumpTarget::Tokens, DumpTarget::Ast, DumpTarget::Bytecode] {
        let out = runner.dump("partials/item.html", target).unwrap();
        assert!(!out.is_empty(), "{:?} dump is empty", target);
    }
    assert!(runner.dump("partials/item.html", DumpTarget::Tokens).unwrap().contains("item"));
}
