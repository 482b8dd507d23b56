//! Rendering and dumping for the CLI
//!
//! The Runner owns one environment configured from the command line and
//! loads every template through a filesystem loader over the search paths.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use core_types::{UndefinedBehavior, Value};
use environment::{Autoescape, Environment, FileSystemLoader};

use crate::cli::{Cli, DumpTarget};
use crate::error::{CliError, CliResult};

/// Renders templates for the CLI
#[derive(Debug, Clone)]
pub struct Runner {
    env: Environment,
}

impl Runner {
    /// Runner over `search_path` with default settings
    ///
    /// # Example
    /// ```
    /// use template_cli::Runner;
    ///
    /// let runner = Runner::new(&[std::path::PathBuf::from(".")]).unwrap();
    /// assert_eq!(runner.render_string("{{ 6 * 7 }}", core_types::Value::None).unwrap(), "42");
    /// ```
    pub fn new(search_path: &[PathBuf]) -> CliResult<Self> {
        let env = Environment::builder()
            .loader(FileSystemLoader::new(search_path))
            .build()?;
        Ok(Self { env })
    }

    /// Runner configured from parsed arguments
    pub fn from_cli(cli: &Cli) -> CliResult<Self> {
        let search_path = if cli.search_path.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            cli.search_path.clone()
        };
        let undefined = if cli.strict {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Default
        };
        let env = Environment::builder()
            .loader(FileSystemLoader::new(&search_path))
            .autoescape(Autoescape::from(cli.autoescape))
            .undefined(undefined)
            .trim_blocks(cli.trim_blocks)
            .lstrip_blocks(cli.lstrip_blocks)
            .build()?;
        tracing::debug!(search_path = ?search_path, strict = cli.strict, "environment ready");
        Ok(Self { env })
    }

    /// The underlying environment
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Read a JSON object from `path` as the render context
    pub fn load_context(path: &Path) -> CliResult<Value> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_context(&text)
    }

    /// Parse a JSON object into a render context
    pub fn parse_context(text: &str) -> CliResult<Value> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        if !json.is_object() {
            let kind = match json {
                serde_json::Value::Array(_) => "an array",
                serde_json::Value::String(_) => "a string",
                serde_json::Value::Number(_) => "a number",
                serde_json::Value::Bool(_) => "a boolean",
                _ => "null",
            };
            return Err(CliError::ContextShape(kind.to_string()));
        }
        Ok(Value::from_json(json))
    }

    /// Render a template from the search path
    pub fn render(&self, name: &str, context: Value) -> CliResult<String> {
        let template = self.env.get_template(name)?;
        Ok(template.render(context)?)
    }

    /// Render template source given inline
    pub fn render_string(&self, source: &str, context: Value) -> CliResult<String> {
        Ok(self.env.from_string(source)?.render(context)?)
    }

    /// Text for one compiler stage of a template
    pub fn dump(&self, name: &str, target: DumpTarget) -> CliResult<String> {
        let found = self.env.get_source(name)?;
        let filename = found.filename.as_deref();
        let mut out = String::new();
        match target {
            DumpTarget::Tokens => {
                for token in self.env.lex(&found.source, Some(name))? {
                    let _ = writeln!(out, "{:>4} {:?} {:?}", token.lineno, token.kind, token.value);
                }
            }
            DumpTarget::Ast => {
                let ast = self.env.parse(&found.source, Some(name), filename)?;
                let _ = writeln!(out, "{:#?}", ast);
            }
            DumpTarget::Bytecode => {
                let code = self.env.compile(&found.source, Some(name), filename)?;
                out.push_str(&code.disassemble());
            }
        }
        Ok(out)
    }

    /// Execute the command described by `cli`
    pub fn run(&self, cli: &Cli) -> CliResult<String> {
        if let Some(target) = cli.dump {
            return self.dump(&cli.template, target);
        }
        let context = match &cli.context {
            Some(path) => Self::load_context(path)?,
            None => Value::None,
        };
        self.render(&cli.template, context)
    }
}
