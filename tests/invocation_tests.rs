//! Integration tests for the invocation pipeline.

use matbind::catalog::Catalog;
use matbind::error::{ForeignError, InvocationError};
use matbind::image::{BitDepth, ImageBuffer, ImageRegistry, Pixels, Roi};
use matbind::invoke::{Argument, Executor, InvocationState};
use matbind::loader::{Archive, Namespace, OperationDef, TypeDef};
use matbind::mat::{ElemType, Mat};
use matbind::store::{ResultStore, StoreEvent};
use matbind::value::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn threshold(mat: &Mat, level: f64) -> Mat {
    let mut out = mat.clone();
    out.map_in_place(|v| if v > level { 255.0 } else { 0.0 });
    out
}

struct Fixture {
    executor: Arc<Executor>,
    images: Arc<ImageRegistry>,
    store: Arc<ResultStore>,
    saw_locked: Arc<AtomicBool>,
}

fn fixture() -> Fixture {
    let images = Arc::new(ImageRegistry::new());
    let saw_locked = Arc::new(AtomicBool::new(false));
    let watched = Arc::clone(&images);
    let seen = Arc::clone(&saw_locked);

    let ns = Namespace::new();
    let archive = ns.mount(
        Archive::builder("imgops-1.0.so")
            .with_type(
                TypeDef::new("org.imgops", "Foo")
                    .operation(OperationDef::new("threshold", "Mat", &["Mat", "int"], |args| {
                        let level = args[1].as_f64().unwrap_or_default();
                        let mat = args[0].as_mat().ok_or_else(|| ForeignError::failed("no mat"))?;
                        Ok(Value::Mat(threshold(mat, level)))
                    }))
                    .operation(OperationDef::new("brighten", "void", &["Mat", "double"], |args| {
                        let amount = args[1].as_f64().unwrap_or_default();
                        if let Some(mat) = args[0].as_mat_mut() {
                            mat.map_in_place(|v| v + amount);
                        }
                        Ok(Value::Void)
                    }))
                    .operation(OperationDef::new("touch", "void", &["Mat"], |_| Ok(Value::Void)))
                    .operation(OperationDef::new("retype", "Mat", &["Mat", "Mat"], |args| {
                        let first = args[0].as_mat_mut().ok_or_else(|| ForeignError::failed("no mat"))?;
                        first.map_in_place(|v| 255.0 - v);
                        let original = first.clone();
                        args[1] = Value::Mat(Mat::zeros(1, 1, ElemType::F32C1));
                        Ok(Value::Mat(original))
                    }))
                    .operation(OperationDef::new("allocate", "Mat", &["int"], |_| {
                        Err(ForeignError::out_of_memory("cannot allocate 4 GiB"))
                    }))
                    .operation(OperationDef::new("locked", "boolean", &[], move |_| {
                        let locked = !watched.is_empty()
                            && watched.titles().iter().all(|t| {
                                watched.find(t).is_some_and(|i| i.is_locked())
                            });
                        seen.store(locked, Ordering::SeqCst);
                        Ok(Value::Bool(locked))
                    })),
            )
            .build(),
    );
    let catalog = Arc::new(Catalog::new());
    catalog.rebuild(&ns, archive.path()).unwrap();
    let store = Arc::new(ResultStore::new());
    let executor = Arc::new(Executor::new(catalog, Arc::clone(&images), Arc::clone(&store)));
    Fixture {
        executor,
        images,
        store,
        saw_locked,
    }
}

fn gradient(width: u32, height: u32) -> ImageBuffer {
    let data = (0..width * height).map(|i| (i * 10 % 256) as u8).collect();
    ImageBuffer::from_pixels(width, height, Pixels::Gray8(data)).unwrap()
}

/// Test threshold publishes an image with the input's dimensions.
#[test]
fn test_threshold_publishes_image() {
    let fx = fixture();
    let input = fx.images.open("input", gradient(6, 4));

    let outcome = fx
        .executor
        .invoke(
            "Mat threshold(Mat, int)",
            vec![Argument::Image(Arc::clone(&input)), Value::Int(100).into()],
            "out",
        )
        .unwrap();

    assert_eq!(outcome.published.as_deref(), Some("out"));
    assert_eq!(
        outcome.states,
        vec![
            InvocationState::ArgsCollected,
            InvocationState::HostToLibraryConverted,
            InvocationState::Invoked,
            InvocationState::LibraryToHostConverted,
            InvocationState::Published,
            InvocationState::Completed,
        ]
    );

    let stored = fx.store.get("out").unwrap();
    let image = stored.as_image().unwrap();
    assert_eq!(image.dimensions(), input.dimensions());
    assert_eq!(image.title(), "out");
    assert!(fx.images.find("out").is_some());
    image.with_buffer(|b| {
        assert_eq!(b.depth(), BitDepth::Gray8);
        assert_eq!(b.get(0, 0), Some(0.0));
        assert_eq!(b.get(5, 3), Some(255.0));
    });
    assert_eq!(fx.store.names_of_type("ImagePlus"), vec!["out"]);
}

/// Test that an empty result name skips publishing.
#[test]
fn test_empty_result_name_does_not_publish() {
    let fx = fixture();
    let input = fx.images.open("input", gradient(2, 2));
    let outcome = fx
        .executor
        .invoke("Mat threshold(Mat, int)", vec![input.into(), Value::Int(0).into()], "")
        .unwrap();
    assert!(outcome.published.is_none());
    assert!(fx.store.is_empty());
    assert!(matches!(outcome.result, Value::Mat(_)));
}

/// Test in/out arguments are written back at the ROI offset only.
#[test]
fn test_roi_write_back_at_offset() {
    let fx = fixture();
    let image = fx.images.open("roi", ImageBuffer::new(5, 5, BitDepth::Gray16));
    image.set_roi(Some(Roi::new(2, 1, 2, 3)));

    fx.executor
        .invoke(
            "void brighten(Mat, double)",
            vec![Arc::clone(&image).into(), Value::Int(7).into()],
            "ignored",
        )
        .unwrap();

    image.with_buffer(|b| {
        for y in 0..5 {
            for x in 0..5 {
                let inside = (2..4).contains(&x) && (1..4).contains(&y);
                let expected = if inside { 7.0 } else { 0.0 };
                assert_eq!(b.get(x, y), Some(expected), "pixel {x},{y}");
            }
        }
    });
    assert!(fx.store.is_empty());
}

/// Test 24-bit images keep their channel order through a round trip.
#[test]
fn test_rgb_round_trip() {
    let fx = fixture();
    let pixels = vec![0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0x0012_3456];
    let image = fx.images.open(
        "rgb",
        ImageBuffer::from_pixels(2, 2, Pixels::Rgb24(pixels.clone())).unwrap(),
    );
    fx.executor
        .invoke("void touch(Mat)", vec![Arc::clone(&image).into()], "")
        .unwrap();
    image.with_buffer(|b| assert_eq!(b.pixels(), &Pixels::Rgb24(pixels)));
}

/// Test out-of-memory is reported distinctly from other failures.
#[test]
fn test_out_of_memory_is_distinct() {
    let fx = fixture();
    let err = fx
        .executor
        .invoke("Mat allocate(int)", vec![Value::Int(1 << 30).into()], "big")
        .unwrap_err();
    assert!(err.is_out_of_memory());
    assert!(matches!(
        err,
        InvocationError::OutOfMemory { ref message, .. } if message == "cannot allocate 4 GiB"
    ));
    assert!(!fx.store.contains("big"));
}

/// Test every open image is locked while the callable runs.
#[test]
fn test_images_locked_during_call() {
    let fx = fixture();
    let a = fx.images.open("a", gradient(2, 2));
    let b = fx.images.open("b", gradient(3, 3));

    let outcome = fx.executor.invoke("boolean locked()", vec![], "").unwrap();
    assert!(matches!(outcome.result, Value::Bool(true)));
    assert!(fx.saw_locked.load(Ordering::SeqCst));
    assert!(!a.is_locked() && !b.is_locked());
    assert_eq!(a.revision(), 1);
    assert_eq!(b.revision(), 1);
}

/// Test images are unlocked even when the invocation fails.
#[test]
fn test_images_unlocked_after_failure() {
    let fx = fixture();
    let image = fx.images.open("a", gradient(2, 2));
    let err = fx.executor.invoke("Mat threshold(Mat, int)", vec![], "x").unwrap_err();
    assert!(matches!(err, InvocationError::ArgumentCount { expected: 2, actual: 0, .. }));
    assert!(!image.is_locked());
    assert!(image.update(|b| b.set(0, 0, 9.0)).unwrap());
}

/// Test a write-back that cannot succeed leaves no host-side changes.
#[test]
fn test_failed_write_back_has_no_side_effects() {
    let fx = fixture();
    let a = fx.images.open("a", gradient(2, 2));
    let b = fx.images.open("b", gradient(2, 2));
    let before = a.with_buffer(|buf| buf.clone());

    let err = fx
        .executor
        .invoke("Mat retype(Mat, Mat)", vec![Arc::clone(&a).into(), Arc::clone(&b).into()], "out")
        .unwrap_err();
    assert!(matches!(err, InvocationError::Marshal { .. }));
    assert!(!fx.store.contains("out"));
    assert_eq!(fx.images.titles(), vec!["a", "b"]);
    assert_eq!(a.with_buffer(|buf| buf.clone()), before);
    assert!(!a.is_locked() && !b.is_locked());
}

/// Test an ROI outside the image fails with a marshaling error.
#[test]
fn test_roi_outside_image() {
    let fx = fixture();
    let image = fx.images.open("a", gradient(2, 2));
    image.set_roi(Some(Roi::new(10, 10, 2, 2)));
    let err = fx
        .executor
        .invoke("void brighten(Mat, double)", vec![image.into(), Value::Double(1.0).into()], "")
        .unwrap_err();
    assert!(matches!(err, InvocationError::Marshal { .. }));
}

/// Test async invocation and store listeners.
#[tokio::test]
async fn test_async_invoke_notifies_listeners() {
    let fx = fixture();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    fx.store.on_change(move |event| {
        if let StoreEvent::Inserted { name } | StoreEvent::Replaced { name } = event {
            sink.lock().unwrap().push(name.clone());
        }
    });
    let input = fx.images.open("input", gradient(4, 4));

    for _ in 0..2 {
        let outcome = Arc::clone(&fx.executor)
            .invoke_async(
                "Mat threshold(Mat, int)",
                vec![Arc::clone(&input).into(), Value::Int(50).into()],
                "mask",
            )
            .await
            .unwrap();
        assert_eq!(outcome.published.as_deref(), Some("mask"));
    }
    assert_eq!(*events.lock().unwrap(), vec!["mask", "mask"]);
    assert_eq!(fx.store.len(), 1);
}

/// Test concurrent invocations share the image locks.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations() {
    let fx = fixture();
    let input = fx.images.open("input", gradient(8, 8));
    let done = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..8 {
        let executor = Arc::clone(&fx.executor);
        let input = Arc::clone(&input);
        let done = Arc::clone(&done);
        handles.push(tokio::spawn(async move {
            executor
                .invoke_async(
                    "Mat threshold(Mat, int)",
                    vec![input.into(), Value::Int(i * 10).into()],
                    format!("out{i}"),
                )
                .await
                .unwrap();
            done.fetch_add(1, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(done.load(Ordering::SeqCst), 8);
    assert_eq!(fx.store.len(), 8);
    assert!(!input.is_locked());
}
