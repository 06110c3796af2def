//! Runs cataloged operations against host images.

use super::state::{InvocationState, StateTrail};
use crate::catalog::{Catalog, OperationHandle};
use crate::converters::{check_write_back, effective_roi, image_to_mat, mat_to_image, write_back};
use crate::error::{ConstructionError, ConversionError, ForeignError, InvocationError};
use crate::image::{HostImage, ImageBuffer, ImageRegistry};
use crate::loader::Visibility;
use crate::observability::{InvocationMetrics, span_invocation, trace_invocation_error};
use crate::store::{ResultStore, StoredValue};
use crate::value::{Value, simple_name};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One argument of an invocation.
#[derive(Debug, Clone)]
pub enum Argument {
    /// A host image; converted to a matrix over its ROI and written back
    /// afterwards.
    Image(Arc<HostImage>),
    /// A library value passed as-is.
    Value(Value),
}

impl From<Arc<HostImage>> for Argument {
    fn from(image: Arc<HostImage>) -> Self {
        Argument::Image(image)
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Value(value)
    }
}

/// What a successful invocation produced.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// Signature that was invoked.
    pub signature: String,
    /// Value returned by the callable.
    pub result: Value,
    /// Name the result was published under, if any.
    pub published: Option<String>,
    /// States visited, ending in `Completed`.
    pub states: Vec<InvocationState>,
}

// An image argument that has to be written back after the call.
struct Marshaled {
    index: usize,
    image: Arc<HostImage>,
    origin: (i32, i32),
}

// A converted result waiting for the write-backs to succeed.
enum Publish {
    Image(ImageBuffer),
    Value(Value),
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callable panicked".to_string()
    }
}

fn call_guarded(
    f: impl FnOnce() -> Result<Value, ForeignError>,
) -> Result<Value, ForeignError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(ForeignError::Panicked(panic_message(payload))))
}

/// Drives invocations and constructions against a catalog.
///
/// Every invocation locks all open host images for its whole duration and
/// holds an [`InvocationPermit`](crate::catalog::InvocationPermit), so the
/// catalog cannot change underneath it.
#[derive(Debug)]
pub struct Executor {
    catalog: Arc<Catalog>,
    images: Arc<ImageRegistry>,
    store: Arc<ResultStore>,
    closed: AtomicBool,
}

impl Executor {
    /// Create an executor over shared services.
    pub fn new(catalog: Arc<Catalog>, images: Arc<ImageRegistry>, store: Arc<ResultStore>) -> Self {
        Self {
            catalog,
            images,
            store,
            closed: AtomicBool::new(false),
        }
    }

    /// Catalog operations are looked up in.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Registry results are opened in.
    pub fn images(&self) -> &Arc<ImageRegistry> {
        &self.images
    }

    /// Store results are published to.
    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Refuse new invocations. Running ones finish normally.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Invoke the operation cataloged under `signature`.
    ///
    /// A non-void result is published under `result_name` unless the name is
    /// empty; matrix results become new host images.
    pub fn invoke(
        &self,
        signature: &str,
        args: Vec<Argument>,
        result_name: &str,
    ) -> Result<InvocationOutcome, InvocationError> {
        if self.is_closed() {
            return Err(InvocationError::Closed);
        }
        let _permit = self.catalog.begin_invocation();
        let handle = self
            .catalog
            .lookup_operation(signature)
            .ok_or_else(|| InvocationError::UnknownOperation(signature.to_string()))?;

        let _span = span_invocation(signature).entered();
        let metrics = InvocationMetrics::new(signature);
        let _timer = metrics.start_timer();
        let mut trail = StateTrail::new(signature);

        match self.run(&handle, args, result_name, &mut trail) {
            Ok((result, published)) => {
                trail.advance(InvocationState::Completed);
                metrics.record_completed();
                tracing::info!(
                    signature,
                    result = result.type_name(),
                    published = published.as_deref().unwrap_or(""),
                    "invocation completed"
                );
                Ok(InvocationOutcome {
                    signature: signature.to_string(),
                    result,
                    published,
                    states: trail.into_states(),
                })
            }
            Err(err) => {
                trail.advance(InvocationState::Failed);
                metrics.record_failed(err.is_out_of_memory());
                trace_invocation_error(signature, &err);
                Err(err)
            }
        }
    }

    /// Run [`invoke`](Self::invoke) on a blocking worker.
    pub async fn invoke_async(
        self: Arc<Self>,
        signature: impl Into<String>,
        args: Vec<Argument>,
        result_name: impl Into<String>,
    ) -> Result<InvocationOutcome, InvocationError> {
        let signature = signature.into();
        let result_name = result_name.into();
        tokio::task::spawn_blocking(move || self.invoke(&signature, args, &result_name))
            .await
            .map_err(|e| InvocationError::Worker(e.to_string()))?
    }

    fn run(
        &self,
        handle: &OperationHandle,
        args: Vec<Argument>,
        result_name: &str,
        trail: &mut StateTrail<'_>,
    ) -> Result<(Value, Option<String>), InvocationError> {
        let signature = handle.signature();
        let op = handle.def();
        let marshal_err = |source: ConversionError| InvocationError::Marshal {
            signature: signature.to_string(),
            source,
        };

        // Unlocks and marks every image for redisplay on all paths.
        let _locked = self.images.lock_all();

        if args.len() != op.params.len() {
            return Err(InvocationError::ArgumentCount {
                signature: signature.to_string(),
                expected: op.params.len(),
                actual: args.len(),
            });
        }

        let mut marshaled = Vec::new();
        let mut values = Vec::with_capacity(args.len());
        for (index, (arg, param)) in args.into_iter().zip(&op.params).enumerate() {
            let value = match arg {
                Argument::Image(image) => {
                    let roi = image.roi();
                    let (mat, region) = image
                        .with_buffer(|buffer| {
                            let region = effective_roi(buffer, roi)?;
                            image_to_mat(buffer, Some(region)).map(|mat| (mat, region))
                        })
                        .map_err(marshal_err)?;
                    marshaled.push(Marshaled {
                        index,
                        image,
                        origin: region.offset(),
                    });
                    Value::Mat(mat)
                }
                Argument::Value(value) => value,
            };
            let value = value.coerce(param).map_err(|rejected| InvocationError::ArgumentType {
                signature: signature.to_string(),
                index,
                expected: simple_name(param).to_string(),
                actual: rejected.type_name().to_string(),
            })?;
            values.push(value);
        }
        trail.advance(InvocationState::HostToLibraryConverted);

        let result = call_guarded(|| op.call(&mut values))
            .map_err(|e| InvocationError::from_foreign(signature, e))?;
        trail.advance(InvocationState::Invoked);

        // Everything that can fail runs before the first host-side change.
        let publish = if !result.is_void() && !result_name.is_empty() {
            Some(match &result {
                Value::Mat(mat) => Publish::Image(mat_to_image(mat).map_err(marshal_err)?),
                other => Publish::Value(other.clone()),
            })
        } else {
            None
        };
        let mut write_backs = Vec::with_capacity(marshaled.len());
        for m in &marshaled {
            let mat = values[m.index].as_mat().ok_or_else(|| {
                marshal_err(ConversionError::TypeMismatch {
                    expected: "Mat".to_string(),
                    actual: values[m.index].type_name().to_string(),
                })
            })?;
            m.image
                .with_buffer(|buffer| check_write_back(mat, buffer))
                .map_err(marshal_err)?;
            write_backs.push((m, mat));
        }

        for (m, mat) in write_backs {
            m.image
                .write_locked(|buffer| write_back(mat, buffer, m.origin))
                .map_err(marshal_err)?;
        }
        trail.advance(InvocationState::LibraryToHostConverted);

        let published = publish.map(|publish| {
            let stored = match publish {
                Publish::Image(buffer) => StoredValue::Image(self.images.open(result_name, buffer)),
                Publish::Value(value) => StoredValue::Value(value),
            };
            self.store.put(result_name, stored);
            result_name.to_string()
        });
        trail.advance(InvocationState::Published);
        Ok((result, published))
    }

    /// Call the `index`-th public constructor of the constructible type
    /// `type_name`.
    pub fn construct_instance(
        &self,
        type_name: &str,
        index: usize,
        args: Vec<Value>,
    ) -> Result<Value, ConstructionError> {
        let _permit = self.catalog.begin_invocation();
        let loaded = self
            .catalog
            .lookup_type(type_name)
            .ok_or_else(|| ConstructionError::UnknownType(type_name.to_string()))?;
        let ctor = loaded
            .constructors()
            .iter()
            .filter(|c| c.visibility == Visibility::Public)
            .nth(index)
            .ok_or_else(|| ConstructionError::NoSuchConstructor {
                type_name: type_name.to_string(),
                index,
            })?;

        if args.len() != ctor.params.len() {
            return Err(ConstructionError::InvalidArguments {
                type_name: type_name.to_string(),
                reason: format!("expected {} arguments, got {}", ctor.params.len(), args.len()),
            });
        }
        let mut values = args
            .into_iter()
            .zip(&ctor.params)
            .enumerate()
            .map(|(i, (value, param))| {
                value
                    .coerce(param)
                    .map_err(|rejected| ConstructionError::InvalidArguments {
                        type_name: type_name.to_string(),
                        reason: format!(
                            "argument {} must be {}, got {}",
                            i,
                            simple_name(param),
                            rejected.type_name()
                        ),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let instance =
            call_guarded(|| ctor.call(&mut values)).map_err(|source| ConstructionError::Failed {
                type_name: type_name.to_string(),
                source,
            })?;
        tracing::info!(type_name, constructor = index, "constructed instance");
        Ok(instance)
    }

    /// Construct an instance and publish it to the store under `name`.
    pub fn construct_into(
        &self,
        type_name: &str,
        index: usize,
        args: Vec<Value>,
        name: &str,
    ) -> Result<Value, ConstructionError> {
        let instance = self.construct_instance(type_name, index, args)?;
        self.store.put(name, instance.clone());
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::image::{Pixels, Roi};
    use crate::loader::{Archive, ConstructorDef, Namespace, OperationDef, TypeDef};
    use crate::value::Object;

    fn gray(width: u32, height: u32, fill: impl Fn(u32, u32) -> u8) -> ImageBuffer {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.push(fill(x, y));
            }
        }
        ImageBuffer::from_pixels(width, height, Pixels::Gray8(data)).unwrap()
    }

    fn executor() -> Executor {
        let ns = Namespace::new();
        let archive = ns.mount(
            Archive::builder("lib.so")
                .with_type(
                    TypeDef::new("org.example", "Foo")
                        .operation(OperationDef::new("invert", "void", &["Mat"], |args| {
                            if let Some(mat) = args[0].as_mat_mut() {
                                mat.map_in_place(|v| 255.0 - v);
                            }
                            Ok(Value::Void)
                        }))
                        .operation(OperationDef::new("scale", "double", &["double", "int"], |args| {
                            let a = args[0].as_f64().unwrap_or_default();
                            let b = args[1].as_f64().unwrap_or_default();
                            Ok(Value::Double(a * b))
                        }))
                        .operation(OperationDef::new("boom", "void", &[], |_| panic!("kaboom")))
                        .operation(OperationDef::new("oom", "void", &[], |_| {
                            Err(ForeignError::out_of_memory("no heap"))
                        })),
                )
                .with_type(
                    TypeDef::new("org.example", "Counter")
                        .constructor(ConstructorDef::new(&["int"], |args| {
                            let start = args[0].as_i64().unwrap_or_default();
                            Ok(Value::Object(Object::new("org.example.Counter", start)))
                        }))
                        .constructor(ConstructorDef::new(&[], |_| Ok(Value::Void)).private()),
                )
                .build(),
        );
        let catalog = Arc::new(Catalog::new());
        catalog.rebuild(&ns, archive.path()).unwrap();
        Executor::new(catalog, Arc::new(ImageRegistry::new()), Arc::new(ResultStore::new()))
    }

    #[test]
    fn test_invoke_writes_back_through_roi() {
        let exec = executor();
        let image = exec.images().open("img", gray(4, 4, |_, _| 10));
        image.set_roi(Some(Roi::new(1, 1, 2, 2)));

        let outcome = exec
            .invoke("void invert(Mat)", vec![image.clone().into()], "")
            .unwrap();
        assert!(outcome.result.is_void());
        assert_eq!(outcome.published, None);
        assert_eq!(outcome.states.last(), Some(&InvocationState::Completed));

        image.with_buffer(|b| {
            assert_eq!(b.get(0, 0), Some(10.0));
            assert_eq!(b.get(1, 1), Some(245.0));
            assert_eq!(b.get(2, 2), Some(245.0));
            assert_eq!(b.get(3, 3), Some(10.0));
        });
        assert!(!image.is_locked());
        assert_eq!(image.revision(), 1);
    }

    #[test]
    fn test_invoke_widens_and_publishes_values() {
        let exec = executor();
        let outcome = exec
            .invoke(
                "double scale(double, int)",
                vec![Value::Int(3).into(), Value::Byte(2).into()],
                "product",
            )
            .unwrap();
        assert!(matches!(outcome.result, Value::Double(v) if v == 6.0));
        assert_eq!(outcome.published.as_deref(), Some("product"));
        let stored = exec.store().get("product").unwrap();
        assert!(matches!(stored.as_value(), Some(Value::Double(v)) if *v == 6.0));
    }

    #[test]
    fn test_argument_errors() {
        let exec = executor();
        let err = exec.invoke("void invert(Mat)", vec![], "").unwrap_err();
        assert!(matches!(err, InvocationError::ArgumentCount { expected: 1, actual: 0, .. }));

        let err = exec
            .invoke("void invert(Mat)", vec![Value::from("x").into()], "")
            .unwrap_err();
        assert!(matches!(err, InvocationError::ArgumentType { index: 0, .. }));

        let err = exec.invoke("void nope()", vec![], "").unwrap_err();
        assert!(matches!(err, InvocationError::UnknownOperation(_)));
    }

    #[test]
    fn test_panics_and_oom_are_reported() {
        let exec = executor();
        let err = exec.invoke("void boom()", vec![], "").unwrap_err();
        assert!(matches!(
            err,
            InvocationError::Failed { source: ForeignError::Panicked(ref m), .. } if m == "kaboom"
        ));

        let err = exec.invoke("void oom()", vec![], "").unwrap_err();
        assert!(err.is_out_of_memory());
    }

    #[test]
    fn test_closed_executor_refuses() {
        let exec = executor();
        exec.close();
        assert!(matches!(
            exec.invoke("void oom()", vec![], ""),
            Err(InvocationError::Closed)
        ));
    }

    #[test]
    fn test_construct_instance() {
        let exec = executor();
        let counter = exec
            .construct_into("Counter", 0, vec![Value::Byte(5)], "c")
            .unwrap();
        assert_eq!(counter.downcast_ref::<i64>(), Some(&5));
        assert_eq!(exec.store().names_of_type("Counter"), vec!["c"]);

        assert!(matches!(
            exec.construct_instance("Counter", 1, vec![]),
            Err(ConstructionError::NoSuchConstructor { index: 1, .. })
        ));
        assert!(matches!(
            exec.construct_instance("Counter", 0, vec![]),
            Err(ConstructionError::InvalidArguments { .. })
        ));
        assert!(matches!(
            exec.construct_instance("Missing", 0, vec![]),
            Err(ConstructionError::UnknownType(_))
        ));
    }

    #[test]
    fn test_host_updates_rejected_while_locked() {
        let exec = executor();
        let image = exec.images().open("img", gray(2, 2, |_, _| 0));
        let lock = exec.images().lock_all();
        assert!(matches!(image.update(|_| ()), Err(Error::ImageLocked(_))));
        drop(lock);
        assert!(image.update(|b| b.set(0, 0, 1.0)).unwrap());
    }
}
