use crate::assets::Asset;
use crate::error::{EngineError, Result};
use crate::memory::{AllocationTag, Memory};
use ahash::AHashMap;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Owner tag on file buffers; only `FileData` releases them
const FILE_DATA_OWNER: &str = "LoadContext::read_bytes";

/// Byte-oriented file access used by asset loads
pub trait FileReader {
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Reads from the local filesystem
#[derive(Clone, Copy, Debug, Default)]
pub struct FsReader;

impl FileReader for FsReader {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path)
            .map_err(|e| EngineError::Io(format!("Failed to read {}: {e}", path.display())))
    }
}

/// Serves files from an in-memory table
#[derive(Clone, Debug, Default)]
pub struct InMemoryReader {
    files: AHashMap<PathBuf, Vec<u8>>,
}

impl InMemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), bytes.into());
    }
}

impl FileReader for InMemoryReader {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::Io(format!("No such file: {}", path.display())))
    }
}

/// Context provided to `Asset::load`
pub struct LoadContext<'a> {
    path: &'a str,
    full_path: PathBuf,
    reader: &'a dyn FileReader,
    memory: &'a Memory,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(
        path: &'a str,
        full_path: PathBuf,
        reader: &'a dyn FileReader,
        memory: &'a Memory,
    ) -> Self {
        Self {
            path,
            full_path,
            reader,
            memory,
        }
    }

    /// Path as passed to `AssetManager::load`
    pub fn path(&self) -> &str {
        self.path
    }

    /// Path after joining the asset root
    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn memory(&self) -> &'a Memory {
        self.memory
    }

    /// Read the whole file into a buffer tracked under `AllocationTag::File`
    pub fn read_bytes(&self) -> Result<FileData<'a>> {
        let bytes = self.reader.read(&self.full_path)?;
        FileData::copy_from(self.memory, &bytes)
    }

    /// Build a load failure for this path
    pub fn failure(&self, reason: impl Into<String>) -> EngineError {
        EngineError::LoadFailure {
            path: self.path.to_string(),
            reason: reason.into(),
        }
    }
}

/// File contents held in tracked memory; released on drop
pub struct FileData<'a> {
    memory: &'a Memory,
    ptr: Option<NonNull<u8>>,
    len: usize,
}

impl<'a> FileData<'a> {
    fn copy_from(memory: &'a Memory, bytes: &[u8]) -> Result<Self> {
        // Empty files hold no block
        if bytes.is_empty() {
            return Ok(Self {
                memory,
                ptr: None,
                len: 0,
            });
        }

        let ptr = memory.alloc_owned(bytes.len(), AllocationTag::File, FILE_DATA_OWNER)?;
        unsafe { memory.copy(ptr.as_ptr(), bytes.as_ptr(), bytes.len()) };
        Ok(Self {
            memory,
            ptr: Some(ptr),
            len: bytes.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self.ptr {
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    pub fn as_str(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }
}

impl Drop for FileData<'_> {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            if let Err(err) = self.memory.dealloc_owned(ptr.as_ptr(), self.len, FILE_DATA_OWNER) {
                tracing::error!(%err, "failed to release file buffer");
            }
        }
    }
}

/// UTF-8 text file
#[derive(Clone, Debug, Default)]
pub struct TextAsset {
    text: String,
    loaded: bool,
}

impl TextAsset {
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Asset for TextAsset {
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let data = ctx.read_bytes()?;
        let text = data
            .as_str()
            .map_err(|e| ctx.failure(format!("UTF-8 decode error: {e}")))?;
        self.text = text.to_owned();
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.text.clear();
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn memory_size(&self) -> usize {
        self.text.len()
    }
}

/// Raw bytes
#[derive(Clone, Debug, Default)]
pub struct BinaryAsset {
    data: Vec<u8>,
    loaded: bool,
}

impl BinaryAsset {
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Asset for BinaryAsset {
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        self.data = ctx.read_bytes()?.as_bytes().to_vec();
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.data = Vec::new();
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn memory_size(&self) -> usize {
        self.data.len()
    }
}

/// JSON document
#[derive(Clone, Debug, Default)]
pub struct JsonAsset {
    value: serde_json::Value,
    loaded: bool,
}

impl JsonAsset {
    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }
}

impl Asset for JsonAsset {
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let data = ctx.read_bytes()?;
        self.value = serde_json::from_slice(data.as_bytes())
            .map_err(|e| ctx.failure(format!("JSON parse error: {e}")))?;
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.value = serde_json::Value::Null;
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}
