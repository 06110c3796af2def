//! Archives: the unit a namespace loads.
//!
//! An archive is an ordered list of entries. Type entries resolve to a
//! [`TypeDef`], either through a foreign descriptor exported by a shared
//! object or through a definition assembled in-process; resource entries
//! carry no type and are ignored by the inspector.

use super::descriptor::{
    ARCHIVE_ENTRY_POINT, ArchiveDescriptor, CallFrame, CallStatus, FLAG_PUBLIC, FLAG_STATIC,
    InvokeFn, MATBIND_ABI_VERSION, ResolveFn, TypeDescriptor,
};
use crate::error::{ForeignError, LoadError};
use crate::value::Value;
use libloading::{Library, Symbol};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A callable body shared by operations and constructors.
pub type Invoker = Arc<dyn Fn(&mut [Value]) -> Result<Value, ForeignError> + Send + Sync>;

/// Type of the archive entry point function.
type ArchiveEntryPoint = unsafe extern "C" fn() -> *const ArchiveDescriptor;

/// Member visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Callable from outside the library.
    Public,
    /// Internal to the library.
    Private,
}

/// One operation of a type.
#[derive(Clone)]
pub struct OperationDef {
    /// Operation name.
    pub name: String,
    /// Parameter type names, possibly qualified.
    pub params: Vec<String>,
    /// Return type name, `void` for none.
    pub returns: String,
    /// Visibility.
    pub visibility: Visibility,
    /// Whether the operation needs no instance.
    pub is_static: bool,
    invoker: Invoker,
}

impl OperationDef {
    /// A public static operation.
    pub fn new<F>(name: impl Into<String>, returns: impl Into<String>, params: &[&str], f: F) -> Self
    where
        F: Fn(&mut [Value]) -> Result<Value, ForeignError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            returns: returns.into(),
            visibility: Visibility::Public,
            is_static: true,
            invoker: Arc::new(f),
        }
    }

    /// Mark the operation as an instance member.
    pub fn instance(mut self) -> Self {
        self.is_static = false;
        self
    }

    /// Mark the operation as private.
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Call the operation body.
    pub fn call(&self, args: &mut [Value]) -> Result<Value, ForeignError> {
        (self.invoker)(args)
    }
}

impl fmt::Debug for OperationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("visibility", &self.visibility)
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}

/// One constructor of a type.
#[derive(Clone)]
pub struct ConstructorDef {
    /// Parameter type names, possibly qualified.
    pub params: Vec<String>,
    /// Visibility.
    pub visibility: Visibility,
    invoker: Invoker,
}

impl ConstructorDef {
    /// A public constructor.
    pub fn new<F>(params: &[&str], f: F) -> Self
    where
        F: Fn(&mut [Value]) -> Result<Value, ForeignError> + Send + Sync + 'static,
    {
        Self {
            params: params.iter().map(|p| p.to_string()).collect(),
            visibility: Visibility::Public,
            invoker: Arc::new(f),
        }
    }

    /// Mark the constructor as private.
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Call the constructor body.
    pub fn call(&self, args: &mut [Value]) -> Result<Value, ForeignError> {
        (self.invoker)(args)
    }
}

impl fmt::Debug for ConstructorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorDef")
            .field("params", &self.params)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

/// A type defined in an archive.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Simple name.
    pub name: String,
    /// Dotted package, empty for the default package.
    pub package: String,
    /// Capability names the type implements.
    pub capabilities: Vec<String>,
    /// Operations in declaration order.
    pub operations: Vec<OperationDef>,
    /// Constructors in declaration order.
    pub constructors: Vec<ConstructorDef>,
}

impl TypeDef {
    /// A type with no members.
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: package.into(),
            capabilities: Vec::new(),
            operations: Vec::new(),
            constructors: Vec::new(),
        }
    }

    /// Add a capability.
    pub fn capability(mut self, name: impl Into<String>) -> Self {
        self.capabilities.push(name.into());
        self
    }

    /// Add an operation.
    pub fn operation(mut self, op: OperationDef) -> Self {
        self.operations.push(op);
        self
    }

    /// Add a constructor.
    pub fn constructor(mut self, ctor: ConstructorDef) -> Self {
        self.constructors.push(ctor);
        self
    }

    /// `package.Name`, or just `Name` in the default package.
    pub fn qualified_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }

    /// Returns true if the type implements `capability`.
    pub fn implements(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Archive entry path this type is stored under.
    pub fn entry_path(&self) -> String {
        let mut path = self.package.replace('.', "/");
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(&self.name);
        path.push_str(".type");
        path
    }

    /// Build a safe definition from a foreign descriptor.
    ///
    /// # Safety
    ///
    /// The descriptor and everything it points to must stay valid while
    /// `library` (when given) is loaded.
    pub unsafe fn from_descriptor(
        desc: &TypeDescriptor,
        library: Option<Arc<Library>>,
    ) -> Result<Self, &'static str> {
        // SAFETY: Caller guarantees descriptor is valid.
        unsafe {
            desc.validate()?;
            let operations = desc
                .operations()
                .iter()
                .map(|op| OperationDef {
                    name: op.name_str().to_string(),
                    params: op.params().iter().map(|p| p.as_str().to_string()).collect(),
                    returns: op.return_type.as_str().to_string(),
                    visibility: visibility(op.flags),
                    is_static: op.flags & FLAG_STATIC != 0,
                    invoker: foreign_invoker(op.invoke, library.clone()),
                })
                .collect();
            let constructors = desc
                .constructors()
                .iter()
                .map(|ctor| ConstructorDef {
                    params: ctor.params().iter().map(|p| p.as_str().to_string()).collect(),
                    visibility: visibility(ctor.flags),
                    invoker: foreign_invoker(ctor.invoke, library.clone()),
                })
                .collect();
            Ok(Self {
                name: desc.name_str().to_string(),
                package: desc.package_str().to_string(),
                capabilities: desc
                    .capabilities()
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
                operations,
                constructors,
            })
        }
    }
}

fn visibility(flags: u32) -> Visibility {
    if flags & FLAG_PUBLIC != 0 {
        Visibility::Public
    } else {
        Visibility::Private
    }
}

fn foreign_invoker(invoke: Option<InvokeFn>, library: Option<Arc<Library>>) -> Invoker {
    Arc::new(move |args: &mut [Value]| {
        let _library = &library;
        let Some(invoke) = invoke else {
            return Err(ForeignError::failed("member has no entry point"));
        };
        let mut frame = CallFrame {
            args: args.iter_mut().map(std::mem::take).collect(),
            ..CallFrame::default()
        };
        // SAFETY: The descriptor was validated when the type was resolved and
        // the captured Arc keeps its library loaded.
        let status = unsafe { invoke(&mut frame) };
        for (slot, value) in args.iter_mut().zip(frame.args.drain(..)) {
            *slot = value;
        }
        match status {
            CallStatus::Ok => Ok(frame.result),
            CallStatus::Failed => Err(ForeignError::Failed(
                frame.error.unwrap_or_else(|| "foreign call failed".to_string()),
            )),
            CallStatus::OutOfMemory => Err(ForeignError::OutOfMemory(
                frame.error.unwrap_or_default(),
            )),
        }
    })
}

type LazyType = Arc<dyn Fn() -> Result<TypeDef, String> + Send + Sync>;

#[derive(Clone)]
enum EntrySource {
    Defined(Arc<TypeDef>),
    Lazy(LazyType),
    Foreign {
        resolve: ResolveFn,
        library: Option<Arc<Library>>,
    },
    Resource,
}

/// One entry of an archive.
#[derive(Clone)]
pub struct ArchiveEntry {
    path: String,
    source: EntrySource,
}

impl ArchiveEntry {
    /// Path inside the archive.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true if the entry names a type rather than a resource.
    pub fn is_type(&self) -> bool {
        !matches!(self.source, EntrySource::Resource)
    }

    /// Resolve the entry. `Ok(None)` for resources.
    pub(crate) fn resolve(&self) -> Result<Option<Arc<TypeDef>>, String> {
        match &self.source {
            EntrySource::Resource => Ok(None),
            EntrySource::Defined(def) => Ok(Some(Arc::clone(def))),
            EntrySource::Lazy(f) => f().map(|def| Some(Arc::new(def))),
            EntrySource::Foreign { resolve, library } => {
                // SAFETY: The resolver comes from a validated archive
                // descriptor whose library is still loaded.
                let desc = unsafe { resolve() };
                if desc.is_null() {
                    return Err("resolver returned null".to_string());
                }
                // SAFETY: Non-null descriptor from a loaded library.
                let def = unsafe { TypeDef::from_descriptor(&*desc, library.clone()) }
                    .map_err(str::to_string)?;
                Ok(Some(Arc::new(def)))
            }
        }
    }
}

impl fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            EntrySource::Defined(_) => "defined",
            EntrySource::Lazy(_) => "lazy",
            EntrySource::Foreign { .. } => "foreign",
            EntrySource::Resource => "resource",
        };
        f.debug_struct("ArchiveEntry")
            .field("path", &self.path)
            .field("kind", &kind)
            .finish()
    }
}

/// A loaded archive.
///
/// Foreign archives keep their shared object loaded for as long as the
/// archive or any member resolved from it is alive.
pub struct Archive {
    path: PathBuf,
    name: String,
    version: String,
    entries: Vec<ArchiveEntry>,
    _library: Option<Arc<Library>>,
}

impl Archive {
    /// Start assembling an in-process archive.
    pub fn builder(path: impl Into<PathBuf>) -> ArchiveBuilder {
        ArchiveBuilder::new(path)
    }

    /// Open a foreign archive from a shared object.
    ///
    /// The object is opened with local symbol visibility so two archives
    /// exporting the same symbols never see each other.
    ///
    /// # Safety
    ///
    /// Loading archives executes arbitrary code from shared libraries. The
    /// archive must:
    /// - Export a valid `matbind_archive_descriptor` function
    /// - Return a valid, static archive descriptor
    /// - Implement its resolve and invoke functions as documented
    pub unsafe fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        // SAFETY: Loading a dynamic library. Caller ensures the library is trusted.
        let library = unsafe { open_isolated(path) }.map_err(|e| LoadError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let descriptor = {
            // SAFETY: Getting a symbol from the library. Library was just loaded successfully.
            let entry_point: Symbol<ArchiveEntryPoint> = unsafe {
                library
                    .get(ARCHIVE_ENTRY_POINT)
                    .map_err(|_| LoadError::MissingEntryPoint(path.to_path_buf()))?
            };
            // SAFETY: Calling the entry point function. Caller guarantees archive is valid.
            unsafe { entry_point() }
        };
        if descriptor.is_null() {
            return Err(LoadError::NullDescriptor(path.to_path_buf()));
        }

        // SAFETY: Entry point returned non-null; the library stays loaded
        // through the Arc handed to the archive.
        unsafe { Self::from_descriptor(path, &*descriptor, Some(Arc::new(library))) }
    }

    /// Build an archive from a descriptor.
    ///
    /// # Safety
    ///
    /// The descriptor and everything it points to must stay valid while
    /// `library` is loaded (or forever, when `library` is `None`).
    pub unsafe fn from_descriptor(
        path: impl Into<PathBuf>,
        desc: &ArchiveDescriptor,
        library: Option<Arc<Library>>,
    ) -> Result<Self, LoadError> {
        if desc.abi_version != MATBIND_ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                expected: MATBIND_ABI_VERSION,
                actual: desc.abi_version,
            });
        }
        // SAFETY: Caller guarantees the descriptor is properly formed.
        unsafe {
            desc.validate().map_err(LoadError::InvalidDescriptor)?;
            let entries = desc
                .entries()
                .iter()
                .map(|entry| ArchiveEntry {
                    path: entry.path_str().to_string(),
                    source: match entry.resolve {
                        Some(resolve) => EntrySource::Foreign {
                            resolve,
                            library: library.clone(),
                        },
                        None => EntrySource::Resource,
                    },
                })
                .collect();
            Ok(Self {
                path: path.into(),
                name: desc.name_str().to_string(),
                version: desc.version_str().to_string(),
                entries,
                _library: library,
            })
        }
    }

    /// Path the archive was loaded from (its identity within a namespace).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Library name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Library version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Entries in archive order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("entries", &self.entries.len())
            .field("foreign", &self._library.is_some())
            .finish()
    }
}

#[cfg(unix)]
unsafe fn open_isolated(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};
    // SAFETY: Caller guarantees the library is trusted.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map(Library::from)
}

#[cfg(not(unix))]
unsafe fn open_isolated(path: &Path) -> Result<Library, libloading::Error> {
    // SAFETY: Caller guarantees the library is trusted.
    unsafe { Library::new(path) }
}

/// Assembles an archive in-process.
pub struct ArchiveBuilder {
    path: PathBuf,
    name: String,
    version: String,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveBuilder {
    /// Start an archive identified by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        Self {
            path,
            name,
            version: "0.0.0".to_string(),
            entries: Vec::new(),
        }
    }

    /// Set the library name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the library version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Add a type entry.
    pub fn with_type(mut self, def: TypeDef) -> Self {
        self.entries.push(ArchiveEntry {
            path: def.entry_path(),
            source: EntrySource::Defined(Arc::new(def)),
        });
        self
    }

    /// Add a type entry resolved on first load; errors make the entry
    /// unreadable.
    pub fn lazy_type<F>(mut self, path: impl Into<String>, resolve: F) -> Self
    where
        F: Fn() -> Result<TypeDef, String> + Send + Sync + 'static,
    {
        self.entries.push(ArchiveEntry {
            path: path.into(),
            source: EntrySource::Lazy(Arc::new(resolve)),
        });
        self
    }

    /// Add a non-type resource entry.
    pub fn resource(mut self, path: impl Into<String>) -> Self {
        self.entries.push(ArchiveEntry {
            path: path.into(),
            source: EntrySource::Resource,
        });
        self
    }

    /// Finish the archive.
    pub fn build(self) -> Archive {
        Archive {
            path: self.path,
            name: self.name,
            version: self.version,
            entries: self.entries,
            _library: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder_entries() {
        let archive = Archive::builder("/libs/imgops-1.0.so")
            .version("1.0")
            .with_type(TypeDef::new("org.example", "Foo"))
            .resource("META/info.txt")
            .build();
        assert_eq!(archive.name(), "imgops-1.0");
        assert_eq!(archive.version(), "1.0");
        let paths: Vec<_> = archive.entries().iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["org/example/Foo.type", "META/info.txt"]);
        assert!(archive.entries()[0].is_type());
        assert!(!archive.entries()[1].is_type());
    }

    #[test]
    fn test_resolve_entries() {
        let archive = Archive::builder("a.so")
            .with_type(TypeDef::new("", "Bar"))
            .lazy_type("Broken.type", || Err("corrupt".to_string()))
            .resource("readme")
            .build();
        let entries = archive.entries();
        assert_eq!(entries[0].resolve().unwrap().unwrap().qualified_name(), "Bar");
        assert_eq!(entries[1].resolve().unwrap_err(), "corrupt");
        assert!(entries[2].resolve().unwrap().is_none());
    }

    #[test]
    fn test_operation_call() {
        let op = OperationDef::new("add", "int", &["int", "int"], |args| {
            match (&args[0], &args[1]) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
                _ => Err(ForeignError::failed("bad args")),
            }
        });
        assert!(op.is_static);
        assert_eq!(op.visibility, Visibility::Public);
        let mut args = [Value::Int(2), Value::Int(3)];
        assert!(matches!(op.call(&mut args), Ok(Value::Int(5))));
        assert!(!op.clone().instance().is_static);
    }

    #[test]
    fn test_open_missing_archive() {
        let result = unsafe { Archive::open("/nonexistent/archive_xyz.so") };
        assert!(matches!(result, Err(LoadError::NotFound(_))));
    }

    #[test]
    fn test_open_rejects_non_library() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a shared object").unwrap();
        let result = unsafe { Archive::open(file.path()) };
        assert!(matches!(result, Err(LoadError::Open { .. })));
    }
}
