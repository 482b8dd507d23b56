//! Template loaders
//!
//! A loader turns a template name into source text. The environment calls
//! [`Loader::get_source`] on a cache miss and keeps the returned up-to-date
//! check around for `auto_reload`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use core_types::{ErrorKind, Result, TemplateError};
use indexmap::IndexMap;
use parking_lot::RwLock;
use walkdir::WalkDir;

use crate::environment::Environment;

/// Returns false once the source a template was compiled from has changed
pub type UpToDate = Arc<dyn Fn() -> bool + Send + Sync>;

/// What a loader found for a name
#[derive(Clone)]
pub struct TemplateSource {
    /// Template source text
    pub source: String,
    /// Where the source came from, used in error messages
    pub filename: Option<String>,
    /// Staleness check; None means always up to date
    pub uptodate: Option<UpToDate>,
}

impl TemplateSource {
    /// Source without a filename or staleness check
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filename: None,
            uptodate: None,
        }
    }

    /// Attach a filename
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Attach a staleness check
    pub fn with_uptodate(mut self, uptodate: UpToDate) -> Self {
        self.uptodate = Some(uptodate);
        self
    }
}

impl fmt::Debug for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateSource")
            .field("filename", &self.filename)
            .field("len", &self.source.len())
            .field("uptodate", &self.uptodate.is_some())
            .finish()
    }
}

/// Source of templates
pub trait Loader: fmt::Debug + Send + Sync {
    /// Source for `name`. Fails with `TemplateNotFound` if there is none.
    fn get_source(&self, env: &Environment, name: &str) -> Result<TemplateSource>;

    /// Every template name this loader can produce, sorted
    fn list_templates(&self) -> Result<Vec<String>> {
        Err(TemplateError::type_error(
            "this loader cannot iterate over all templates",
        ))
    }
}

/// Split a template name into path segments
///
/// Empty and `.` segments are dropped; `..` and segments containing a
/// platform path separator make the name unloadable.
///
/// ```
/// use environment::split_template_path;
///
/// assert_eq!(split_template_path("a/./b.html").unwrap(), vec!["a", "b.html"]);
/// assert!(split_template_path("../etc/passwd").is_err());
/// ```
pub fn split_template_path(template: &str) -> Result<Vec<String>> {
    let mut pieces = Vec::new();
    for piece in template.split('/') {
        let foreign_separator = std::path::MAIN_SEPARATOR != '/' && piece.contains(std::path::MAIN_SEPARATOR);
        if piece == ".." || foreign_separator {
            return Err(TemplateError::not_found(template));
        }
        if !piece.is_empty() && piece != "." {
            pieces.push(piece.to_string());
        }
    }
    Ok(pieces)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Loads templates from directories on disk
///
/// Search paths are tried in order. Only UTF-8 sources are supported.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    searchpath: Vec<PathBuf>,
    encoding: String,
    followlinks: bool,
}

impl FileSystemLoader {
    /// Loader searching the given directories
    pub fn new<P: AsRef<Path>>(searchpath: impl IntoIterator<Item = P>) -> Self {
        Self {
            searchpath: searchpath.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
            encoding: "utf-8".to_string(),
            followlinks: false,
        }
    }

    /// Source encoding; anything but UTF-8 fails on load
    pub fn with_encoding(mut self, encoding: &str) -> Self {
        self.encoding = encoding.to_string();
        self
    }

    /// Follow symbolic links when listing templates
    pub fn with_followlinks(mut self, followlinks: bool) -> Self {
        self.followlinks = followlinks;
        self
    }

    /// Directories searched, in order
    pub fn searchpath(&self) -> &[PathBuf] {
        &self.searchpath
    }

    fn read(&self, path: &Path) -> Result<String> {
        let normalized = self.encoding.to_ascii_lowercase().replace('_', "-");
        if normalized != "utf-8" && normalized != "utf8" {
            return Err(TemplateError::new(
                ErrorKind::LoaderError,
                format!("unsupported template encoding '{}'", self.encoding),
            ));
        }
        let bytes = std::fs::read(path).map_err(|e| {
            TemplateError::new(
                ErrorKind::LoaderError,
                format!("cannot read '{}': {}", path.display(), e),
            )
        })?;
        String::from_utf8(bytes).map_err(|_| {
            TemplateError::new(
                ErrorKind::LoaderError,
                format!("'{}' is not valid {}", path.display(), self.encoding),
            )
        })
    }
}

impl Loader for FileSystemLoader {
    fn get_source(&self, _env: &Environment, name: &str) -> Result<TemplateSource> {
        let pieces = split_template_path(name)?;
        for search in &self.searchpath {
            let path = pieces.iter().fold(search.clone(), |path, piece| path.join(piece));
            if !path.is_file() {
                continue;
            }
            tracing::trace!(template = name, path = %path.display(), "found template source");
            let source = self.read(&path)?;
            let mtime = modified(&path);
            let watched = path.clone();
            return Ok(TemplateSource::new(source)
                .with_filename(path.to_string_lossy())
                .with_uptodate(Arc::new(move || modified(&watched) == mtime)));
        }
        Err(TemplateError::not_found(name))
    }

    fn list_templates(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for search in &self.searchpath {
            let walker = WalkDir::new(search)
                .follow_links(self.followlinks)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file());
            for entry in walker {
                let Ok(relative) = entry.path().strip_prefix(search) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !found.contains(&name) {
                    found.push(name);
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

/// Loads templates from an in-memory map of name to source
///
/// Sources can be replaced after construction; templates compiled from a
/// replaced source report themselves as out of date.
#[derive(Debug, Clone, Default)]
pub struct DictLoader {
    mapping: Arc<RwLock<IndexMap<String, String>>>,
}

impl DictLoader {
    /// Loader over the given templates
    pub fn new<K: Into<String>, V: Into<String>>(templates: impl IntoIterator<Item = (K, V)>) -> Self {
        let mapping = templates
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            mapping: Arc::new(RwLock::new(mapping)),
        }
    }

    /// Add or replace a template
    pub fn insert(&self, name: impl Into<String>, source: impl Into<String>) {
        self.mapping.write().insert(name.into(), source.into());
    }

    /// Remove a template
    pub fn remove(&self, name: &str) -> Option<String> {
        self.mapping.write().shift_remove(name)
    }
}

impl Loader for DictLoader {
    fn get_source(&self, _env: &Environment, name: &str) -> Result<TemplateSource> {
        let source = self
            .mapping
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::not_found(name))?;
        let mapping = self.mapping.clone();
        let key = name.to_string();
        let compiled = source.clone();
        Ok(TemplateSource::new(source)
            .with_uptodate(Arc::new(move || mapping.read().get(&key) == Some(&compiled))))
    }

    fn list_templates(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.mapping.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Callback form of [`FunctionLoader`]
pub type LoadFunction = Arc<dyn Fn(&str) -> Option<TemplateSource> + Send + Sync>;

/// Asks a function for the source; `None` means not found
#[derive(Clone)]
pub struct FunctionLoader {
    load: LoadFunction,
}

impl FunctionLoader {
    /// Wrap a load function
    pub fn new<F>(load: F) -> Self
    where
        F: Fn(&str) -> Option<TemplateSource> + Send + Sync + 'static,
    {
        Self { load: Arc::new(load) }
    }
}

impl fmt::Debug for FunctionLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FunctionLoader")
    }
}

impl Loader for FunctionLoader {
    fn get_source(&self, _env: &Environment, name: &str) -> Result<TemplateSource> {
        (self.load)(name).ok_or_else(|| TemplateError::not_found(name))
    }
}

/// Dispatches to a loader chosen by the name's prefix (`prefix/rest`)
#[derive(Debug, Clone)]
pub struct PrefixLoader {
    mapping: IndexMap<String, Arc<dyn Loader>>,
    delimiter: String,
}

impl PrefixLoader {
    /// Loader over `prefix -> loader` pairs with `/` as delimiter
    pub fn new(mapping: impl IntoIterator<Item = (String, Arc<dyn Loader>)>) -> Self {
        Self {
            mapping: mapping.into_iter().collect(),
            delimiter: "/".to_string(),
        }
    }

    /// Use another prefix delimiter
    pub fn with_delimiter(mut self, delimiter: &str) -> Self {
        self.delimiter = delimiter.to_string();
        self
    }

    fn loader_for<'n>(&self, name: &'n str) -> Result<(&Arc<dyn Loader>, &'n str)> {
        let (prefix, rest) = name
            .split_once(self.delimiter.as_str())
            .ok_or_else(|| TemplateError::not_found(name))?;
        let loader = self
            .mapping
            .get(prefix)
            .ok_or_else(|| TemplateError::not_found(name))?;
        Ok((loader, rest))
    }
}

impl Loader for PrefixLoader {
    fn get_source(&self, env: &Environment, name: &str) -> Result<TemplateSource> {
        let (loader, local) = self.loader_for(name)?;
        loader.get_source(env, local).map_err(|err| {
            if err.kind == ErrorKind::TemplateNotFound {
                TemplateError::not_found(name)
            } else {
                err
            }
        })
    }

    fn list_templates(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for (prefix, loader) in &self.mapping {
            for name in loader.list_templates()? {
                names.push(format!("{}{}{}", prefix, self.delimiter, name));
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Tries several loaders in order
#[derive(Debug, Clone)]
pub struct ChoiceLoader {
    loaders: Vec<Arc<dyn Loader>>,
}

impl ChoiceLoader {
    /// Loader trying `loaders` in order
    pub fn new(loaders: Vec<Arc<dyn Loader>>) -> Self {
        Self { loaders }
    }
}

impl Loader for ChoiceLoader {
    fn get_source(&self, env: &Environment, name: &str) -> Result<TemplateSource> {
        for loader in &self.loaders {
            match loader.get_source(env, name) {
                Err(err) if err.kind == ErrorKind::TemplateNotFound => continue,
                other => return other,
            }
        }
        Err(TemplateError::not_found(name))
    }

    fn list_templates(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for loader in &self.loaders {
            for name in loader.list_templates()? {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
