//! Module identity and image types.
//!
//! The loader treats a module as an opaque identity plus a small state record:
//! no image parsing happens here. [`ModuleId`] is the stable identity (path
//! plus SHA-1 content hash), [`ModuleRef`] is a by-name dependency reference
//! as a module would declare it, and [`ModuleImage`] is what the binder hands
//! back when it resolves such a reference.

use std::fmt;
use std::sync::Arc;

use sha1::{Digest, Sha1};

/// SHA-1 content hash identifying a module's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHash([u8; 20]);

impl ModuleHash {
    /// Hash the raw bytes of a module image.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        ModuleHash(hasher.finalize().into())
    }

    /// Construct a hash from its raw 20-byte digest.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        ModuleHash(bytes)
    }

    /// The raw 20-byte digest.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for ModuleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Stable identity of a compiled code module: path plus content hash.
///
/// Immutable once created. Two images with the same path but different
/// contents are different modules; the loader never conflates them.
///
/// # Examples
///
/// ```rust
/// use cildomain::module::ModuleId;
///
/// let id = ModuleId::from_data("core.dll", b"core image bytes");
/// assert_eq!(id.path(), "core.dll");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId {
    path: Arc<str>,
    hash: ModuleHash,
}

impl ModuleId {
    /// Create an identity from a path and an already computed content hash.
    pub fn new(path: impl AsRef<str>, hash: ModuleHash) -> Self {
        ModuleId {
            path: Arc::from(path.as_ref()),
            hash,
        }
    }

    /// Create an identity by hashing the image bytes directly.
    pub fn from_data(path: impl AsRef<str>, data: &[u8]) -> Self {
        ModuleId::new(path, ModuleHash::of(data))
    }

    /// The module's path component.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The module's content hash.
    pub fn hash(&self) -> ModuleHash {
        self.hash
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.hash.to_string();
        write!(f, "{}#{}", self.path, &hex[..8.min(hex.len())])
    }
}

/// A by-name dependency reference, as a module declares it.
///
/// Resolution to a [`ModuleImage`] is the binder's job and happens during the
/// `AddDependencies` level. A reference may pin the expected content hash of
/// its target; the loader then rejects a binder resolution whose hash differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    name: String,
    expected_hash: Option<ModuleHash>,
}

impl ModuleRef {
    /// Reference a dependency by name only.
    pub fn by_name(name: impl Into<String>) -> Self {
        ModuleRef {
            name: name.into(),
            expected_hash: None,
        }
    }

    /// Reference a dependency by name, pinning the expected content hash.
    pub fn with_hash(name: impl Into<String>, hash: ModuleHash) -> Self {
        ModuleRef {
            name: name.into(),
            expected_hash: Some(hash),
        }
    }

    /// The referenced module's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pinned content hash, if the reference declares one.
    pub fn expected_hash(&self) -> Option<ModuleHash> {
        self.expected_hash
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A binder resolution product: the identity of a module plus the small amount
/// of loader-relevant metadata extracted from it.
///
/// The loader never looks inside the image; the declared dependency references
/// and the collectibility flag are all it consumes.
#[derive(Debug, Clone)]
pub struct ModuleImage {
    id: ModuleId,
    dependencies: Vec<ModuleRef>,
    collectible: bool,
}

impl ModuleImage {
    /// Create an image for the given identity, with no dependencies,
    /// non-collectible.
    pub fn new(id: ModuleId) -> Self {
        ModuleImage {
            id,
            dependencies: Vec::new(),
            collectible: false,
        }
    }

    /// Create an image by hashing raw bytes under the given path.
    pub fn from_data(path: impl AsRef<str>, data: &[u8]) -> Self {
        ModuleImage::new(ModuleId::from_data(path, data))
    }

    /// Declare a dependency reference.
    #[must_use]
    pub fn with_dependency(mut self, reference: ModuleRef) -> Self {
        self.dependencies.push(reference);
        self
    }

    /// Mark the module as collectible. Collectible modules require an
    /// [`crate::assembly::AssemblyHolder`] wherever a reference crosses a
    /// point at which the collector could run.
    #[must_use]
    pub fn collectible(mut self) -> Self {
        self.collectible = true;
        self
    }

    /// The module's identity.
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// The declared dependency references, in declaration order.
    pub fn dependencies(&self) -> &[ModuleRef] {
        &self.dependencies
    }

    /// Whether the module's memory may be reclaimed while the process runs.
    pub fn is_collectible(&self) -> bool {
        self.collectible
    }
}
