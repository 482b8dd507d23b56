//! Shared helpers for the environment tests

use core_types::Value;
use environment::{DictLoader, Environment, EnvironmentBuilder};

pub fn vars(json: serde_json::Value) -> Value {
    Value::from_json(json)
}

pub fn dict_env<'a>(templates: impl IntoIterator<Item = (&'a str, &'a str)>) -> EnvironmentBuilder {
    Environment::builder().loader(DictLoader::new(templates))
}

pub fn render_str(env: &Environment, source: &str, context: serde_json::Value) -> core_types::Result<String> {
    env.from_string(source)?.render(vars(context))
}
