//! Error types for matbind.
//!
//! Each concern has its own enum; [`Error`] wraps them for callers that
//! drive several components at once (the [`Forge`](crate::forge::Forge)
//! facade, config IO).

use crate::loader::NamespaceId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using matbind's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for matbind operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An archive, namespace or native library could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A single archive entry could not be enumerated.
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    /// An invocation failed.
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// Host buffer and library matrix are not convertible.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Constructing a library type failed.
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// Nothing is stored under the requested name.
    #[error("no stored value named '{0}'")]
    NotFound(String),

    /// The catalog cannot be replaced while invocations are running.
    #[error("catalog is busy: an invocation is in flight")]
    Busy,

    /// The host image is locked by a running invocation.
    #[error("image '{0}' is locked by a running invocation")]
    ImageLocked(String),

    /// No library has been selected yet.
    #[error("no library selected")]
    NoActiveLibrary,

    /// Config file could not be parsed or written.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading archives and native libraries.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The archive path does not exist.
    #[error("archive not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The platform loader rejected the archive's shared object.
    #[error("failed to open archive '{}': {reason}", path.display())]
    Open {
        /// Archive path.
        path: PathBuf,
        /// Loader message.
        reason: String,
    },

    /// The shared object does not export the archive entry point.
    #[error("missing archive entry point matbind_archive_descriptor in '{}'", .0.display())]
    MissingEntryPoint(PathBuf),

    /// The entry point returned a null descriptor.
    #[error("archive '{}' returned a null descriptor", .0.display())]
    NullDescriptor(PathBuf),

    /// ABI version mismatch.
    #[error("ABI version mismatch: expected {expected}, got {actual}")]
    AbiMismatch {
        /// Expected ABI version.
        expected: u32,
        /// Actual ABI version found.
        actual: u32,
    },

    /// Archive descriptor validation failed.
    #[error("invalid archive descriptor: {0}")]
    InvalidDescriptor(&'static str),

    /// The archive was never added to the namespace.
    #[error("archive '{}' is not part of namespace {namespace}", path.display())]
    NotInNamespace {
        /// Archive path.
        path: PathBuf,
        /// Namespace that was searched.
        namespace: NamespaceId,
    },

    /// The platform loader rejected a native library.
    #[error("failed to load native library '{}': {reason}", path.display())]
    Native {
        /// Library path.
        path: PathBuf,
        /// Loader message.
        reason: String,
    },
}

/// A single archive entry that could not be resolved to a type.
///
/// Never fatal: the inspector logs it and moves on to the next entry.
#[derive(Debug, Clone, Error)]
#[error("skipped entry '{entry}' in '{}': {reason}", archive.display())]
pub struct EnumerationError {
    /// Archive the entry belongs to.
    pub archive: PathBuf,
    /// Entry path inside the archive.
    pub entry: String,
    /// Why the entry was skipped.
    pub reason: String,
}

/// Failure reported by a library callable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForeignError {
    /// The callable reported an error.
    #[error("{0}")]
    Failed(String),

    /// The callable ran out of memory.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The callable panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl ForeignError {
    /// Create a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Create an out-of-memory failure.
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory(message.into())
    }

    /// Returns true if this failure is an out-of-memory condition.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory(_))
    }
}

/// Errors raised by the invocation pipeline.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// No catalog entry carries this signature.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Wrong number of arguments.
    #[error("{signature}: expected {expected} arguments, got {actual}")]
    ArgumentCount {
        /// Operation signature.
        signature: String,
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },

    /// An argument does not match its parameter type.
    #[error("{signature}: argument {index} must be {expected}, got {actual}")]
    ArgumentType {
        /// Operation signature.
        signature: String,
        /// Zero-based argument index.
        index: usize,
        /// Declared parameter type.
        expected: String,
        /// Supplied value type.
        actual: String,
    },

    /// Converting between host buffers and library matrices failed.
    #[error("{signature}: {source}")]
    Marshal {
        /// Operation signature.
        signature: String,
        /// Underlying conversion failure.
        #[source]
        source: ConversionError,
    },

    /// The library callable failed.
    #[error("{signature} failed: {source}")]
    Failed {
        /// Operation signature.
        signature: String,
        /// Error reported by the callable.
        #[source]
        source: ForeignError,
    },

    /// The library callable ran out of memory.
    #[error("{signature} ran out of memory: {message}")]
    OutOfMemory {
        /// Operation signature.
        signature: String,
        /// Message reported by the callable.
        message: String,
    },

    /// The executor was closed.
    #[error("executor is closed")]
    Closed,

    /// The blocking worker running the invocation was lost.
    #[error("invocation worker failed: {0}")]
    Worker(String),
}

impl InvocationError {
    /// Map a callable failure, keeping out-of-memory distinct.
    pub fn from_foreign(signature: &str, error: ForeignError) -> Self {
        match error {
            ForeignError::OutOfMemory(message) => Self::OutOfMemory {
                signature: signature.to_string(),
                message,
            },
            other => Self::Failed {
                signature: signature.to_string(),
                source: other,
            },
        }
    }

    /// Returns true if the callable ran out of memory.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// Errors raised by the pixel/matrix converter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The host buffer bit depth has no matrix counterpart.
    #[error("unsupported host bit depth: {0}")]
    UnsupportedBitDepth(u32),

    /// The matrix element type has no host buffer counterpart.
    #[error("unsupported matrix type: {0}")]
    UnsupportedMatType(String),

    /// The matrix type differs from the buffer it is written back into.
    #[error("matrix type {actual} cannot be written into a {expected} buffer")]
    TypeMismatch {
        /// Type expected by the host buffer.
        expected: String,
        /// Type of the matrix.
        actual: String,
    },

    /// Pixel storage does not match the declared dimensions.
    #[error("expected {expected} samples, got {actual}")]
    DataLength {
        /// Samples required by the dimensions.
        expected: usize,
        /// Samples supplied.
        actual: usize,
    },

    /// The region of interest lies entirely outside the buffer.
    #[error("region {x},{y} {width}x{height} lies outside the image")]
    EmptyRegion {
        /// Left edge.
        x: i32,
        /// Top edge.
        y: i32,
        /// Width.
        width: u32,
        /// Height.
        height: u32,
    },

    /// Text could not be parsed as the requested primitive type.
    #[error("cannot parse '{text}' as {target}")]
    Parse {
        /// Input text.
        text: String,
        /// Target type name.
        target: String,
    },
}

/// Errors raised while constructing library types.
#[derive(Debug, Error)]
pub enum ConstructionError {
    /// No constructible type carries this name.
    #[error("unknown constructible type: {0}")]
    UnknownType(String),

    /// The constructor index is out of range.
    #[error("{type_name} has no public constructor #{index}")]
    NoSuchConstructor {
        /// Type name.
        type_name: String,
        /// Requested constructor index.
        index: usize,
    },

    /// Arguments do not match the constructor parameters.
    #[error("{type_name}: {reason}")]
    InvalidArguments {
        /// Type name.
        type_name: String,
        /// What did not match.
        reason: String,
    },

    /// The constructor failed.
    #[error("constructing {type_name} failed: {source}")]
    Failed {
        /// Type name.
        type_name: String,
        /// Error reported by the constructor.
        #[source]
        source: ForeignError,
    },
}

/// What kind of catalog key collided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// Two operations rendered the same signature.
    Operation,
    /// Two constructible types share a simple name.
    Type,
}

/// A catalog key was written twice; the later entry replaced the earlier one.
///
/// Non-fatal. Returned in catalog reports and logged at `warn`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} '{key}' from {replaced} replaced by {winner}")]
pub struct CacheCollisionWarning {
    /// Which cache collided.
    pub kind: CollisionKind,
    /// Colliding signature or type name.
    pub key: String,
    /// Qualified owner of the entry that was dropped.
    pub replaced: String,
    /// Qualified owner of the entry that was kept.
    pub winner: String,
}
