//! Persistent cache for compiled templates
//!
//! Compiling is the expensive part of loading a template. A bytecode cache
//! stores the compiled module keyed by template identity and validated by a
//! checksum of the source, so a fresh process can skip the compiler.
//!
//! A stored blob is the module's own serialized form (magic, format version,
//! producer tag, body) followed by the 32 byte source checksum. Any blob that
//! fails to decode or whose checksum differs is dropped and the template is
//! recompiled.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use bytecode_system::CompiledTemplate;
use core_types::{ErrorKind, Result, TemplateError};
use parking_lot::Mutex;

const CHECKSUM_LEN: usize = 32;

/// One cache slot: the key of a template and, after a successful load, its
/// compiled module
#[derive(Debug, Clone)]
pub struct Bucket {
    key: String,
    checksum: [u8; CHECKSUM_LEN],
    code: Option<CompiledTemplate>,
}

impl Bucket {
    /// Bucket for a template identified by `name` and `filename` with the
    /// given source
    pub fn new(name: &str, filename: Option<&str>, source: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        if let Some(filename) = filename {
            hasher.update(b"|");
            hasher.update(filename.as_bytes());
        }
        Self {
            key: hasher.finalize().to_hex().to_string(),
            checksum: *blake3::hash(source.as_bytes()).as_bytes(),
            code: None,
        }
    }

    /// Hex key identifying the template
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Hex checksum of the source
    pub fn checksum(&self) -> String {
        blake3::Hash::from(self.checksum).to_hex().to_string()
    }

    /// The loaded or stored module
    pub fn code(&self) -> Option<&CompiledTemplate> {
        self.code.as_ref()
    }

    /// Put a freshly compiled module in the bucket
    pub fn set_code(&mut self, code: CompiledTemplate) {
        self.code = Some(code);
    }

    /// Forget the module
    pub fn reset(&mut self) {
        self.code = None;
    }

    /// Fill the bucket from a stored blob. Undecodable or stale blobs leave
    /// the bucket empty.
    pub fn load_bytes(&mut self, bytes: &[u8]) {
        self.reset();
        if bytes.len() < CHECKSUM_LEN {
            tracing::debug!(key = %self.key, "rejecting truncated bytecode");
            return;
        }
        let (module, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if checksum != self.checksum {
            tracing::debug!(key = %self.key, "rejecting stale bytecode");
            return;
        }
        match CompiledTemplate::from_bytes(module) {
            Ok(code) => self.code = Some(code),
            Err(err) => tracing::debug!(key = %self.key, error = %err.message, "rejecting bytecode"),
        }
    }

    /// Blob for the stored module, None if the bucket is empty
    pub fn to_bytes(&self) -> Result<Option<Vec<u8>>> {
        let Some(code) = &self.code else {
            return Ok(None);
        };
        let mut bytes = code.to_bytes()?;
        bytes.extend_from_slice(&self.checksum);
        Ok(Some(bytes))
    }
}

/// Storage backend for compiled templates
pub trait BytecodeCache: fmt::Debug + Send + Sync {
    /// Fill `bucket` from storage. Leaving it empty means "not cached".
    fn load_bytecode(&self, bucket: &mut Bucket) -> Result<()>;

    /// Persist the module in `bucket`
    fn dump_bytecode(&self, bucket: &Bucket) -> Result<()>;

    /// Drop everything stored
    fn clear(&self) -> Result<()> {
        Ok(())
    }

    /// Bucket for a template, loaded from storage
    fn get_bucket(&self, name: &str, filename: Option<&str>, source: &str) -> Result<Bucket> {
        let mut bucket = Bucket::new(name, filename, source);
        self.load_bytecode(&mut bucket)?;
        Ok(bucket)
    }

    /// Store a bucket
    fn set_bucket(&self, bucket: &Bucket) -> Result<()> {
        self.dump_bytecode(bucket)
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> TemplateError {
    TemplateError::new(
        ErrorKind::LoaderError,
        format!("cannot {} bytecode cache '{}': {}", action, path.display(), err),
    )
}

/// Stores one file per template in a directory
#[derive(Debug, Clone)]
pub struct FileSystemBytecodeCache {
    directory: PathBuf,
    pattern: String,
}

impl FileSystemBytecodeCache {
    /// Default file name pattern; `%s` is replaced by the bucket key
    pub const DEFAULT_PATTERN: &'static str = "__ctpl_%s.cache";

    /// Cache writing into `directory`, which must exist
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            pattern: Self::DEFAULT_PATTERN.to_string(),
        }
    }

    /// Use another file name pattern
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = pattern.to_string();
        self
    }

    fn cache_filename(&self, bucket: &Bucket) -> PathBuf {
        self.directory.join(self.pattern.replace("%s", bucket.key()))
    }
}

impl BytecodeCache for FileSystemBytecodeCache {
    fn load_bytecode(&self, bucket: &mut Bucket) -> Result<()> {
        let path = self.cache_filename(bucket);
        match std::fs::read(&path) {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), "loading bytecode");
                bucket.load_bytes(&bytes);
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error("read", &path, err)),
        }
    }

    fn dump_bytecode(&self, bucket: &Bucket) -> Result<()> {
        let Some(bytes) = bucket.to_bytes()? else {
            return Ok(());
        };
        let path = self.cache_filename(bucket);
        // Write under a temporary name first so readers never see half a blob.
        let partial = path.with_extension("partial");
        std::fs::write(&partial, &bytes).map_err(|e| io_error("write", &partial, e))?;
        std::fs::rename(&partial, &path).map_err(|e| io_error("write", &path, e))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "stored bytecode");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let (prefix, suffix) = self
            .pattern
            .split_once("%s")
            .unwrap_or((self.pattern.as_str(), ""));
        let entries = std::fs::read_dir(&self.directory)
            .map_err(|e| io_error("list", &self.directory, e))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) && name.ends_with(suffix) {
                let path = entry.path();
                std::fs::remove_file(&path).map_err(|e| io_error("remove", &path, e))?;
            }
        }
        Ok(())
    }
}

/// Keeps blobs in process memory
#[derive(Debug, Default)]
pub struct MemoryBytecodeCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBytecodeCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Overwrite a stored blob
    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        self.entries.lock().insert(key.to_string(), bytes);
    }

    /// The stored blob for a key
    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }
}

impl BytecodeCache for MemoryBytecodeCache {
    fn load_bytecode(&self, bucket: &mut Bucket) -> Result<()> {
        if let Some(bytes) = self.get_raw(bucket.key()) {
            bucket.load_bytes(&bytes);
        }
        Ok(())
    }

    fn dump_bytecode(&self, bucket: &Bucket) -> Result<()> {
        if let Some(bytes) = bucket.to_bytes()? {
            self.put_raw(bucket.key(), bytes);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }
}
