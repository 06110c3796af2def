//! Open host images and the lock-all critical section.

use super::buffer::{ImageBuffer, Roi};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// An open host image: a titled buffer with an optional ROI.
///
/// While any invocation holds the image locked, [`HostImage::update`] is
/// rejected. Every unlock bumps the redraw revision so displays know to
/// repaint.
#[derive(Debug)]
pub struct HostImage {
    id: u64,
    title: String,
    buffer: Mutex<ImageBuffer>,
    roi: Mutex<Option<Roi>>,
    locks: AtomicUsize,
    revision: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HostImage {
    /// Create an image that is not yet registered anywhere.
    pub fn new(title: impl Into<String>, buffer: ImageBuffer) -> Self {
        Self {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            title: title.into(),
            buffer: Mutex::new(buffer),
            roi: Mutex::new(None),
            locks: AtomicUsize::new(0),
            revision: AtomicU64::new(0),
        }
    }

    /// Unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Window title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Current region of interest.
    pub fn roi(&self) -> Option<Roi> {
        *lock(&self.roi)
    }

    /// Attach or clear the region of interest.
    pub fn set_roi(&self, roi: Option<Roi>) {
        *lock(&self.roi) = roi;
    }

    /// Width and height.
    pub fn dimensions(&self) -> (u32, u32) {
        let buffer = lock(&self.buffer);
        (buffer.width(), buffer.height())
    }

    /// Returns true while an invocation holds this image.
    pub fn is_locked(&self) -> bool {
        self.locks.load(Ordering::Acquire) > 0
    }

    /// Number of times the image was released for redisplay.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Copy of the current pixels.
    pub fn snapshot(&self) -> ImageBuffer {
        lock(&self.buffer).clone()
    }

    /// Read the buffer.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&ImageBuffer) -> R) -> R {
        f(&lock(&self.buffer))
    }

    /// Mutate the buffer from the host side.
    ///
    /// Fails with [`Error::ImageLocked`] while an invocation holds the image.
    pub fn update<R>(&self, f: impl FnOnce(&mut ImageBuffer) -> R) -> Result<R> {
        if self.is_locked() {
            return Err(Error::ImageLocked(self.title.clone()));
        }
        Ok(f(&mut lock(&self.buffer)))
    }

    /// Mutate the buffer on behalf of the invocation holding the lock.
    pub(crate) fn write_locked<R>(&self, f: impl FnOnce(&mut ImageBuffer) -> R) -> R {
        f(&mut lock(&self.buffer))
    }

    fn acquire(&self) {
        self.locks.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        self.locks.fetch_sub(1, Ordering::AcqRel);
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

/// Every host image currently open, in opening order.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    images: RwLock<IndexMap<u64, Arc<HostImage>>>,
}

impl ImageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new image and return it.
    pub fn open(&self, title: impl Into<String>, buffer: ImageBuffer) -> Arc<HostImage> {
        let image = Arc::new(HostImage::new(title, buffer));
        self.insert(Arc::clone(&image));
        image
    }

    /// Register an existing image.
    pub fn insert(&self, image: Arc<HostImage>) {
        self.images
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(image.id(), image);
    }

    /// Look up by id.
    pub fn get(&self, id: u64) -> Option<Arc<HostImage>> {
        self.images
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Most recently opened image with this title.
    pub fn find(&self, title: &str) -> Option<Arc<HostImage>> {
        self.images
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .rev()
            .find(|image| image.title() == title)
            .cloned()
    }

    /// Titles of all open images.
    pub fn titles(&self) -> Vec<String> {
        self.images
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|image| image.title().to_string())
            .collect()
    }

    /// Close an image.
    pub fn close(&self, id: u64) -> Option<Arc<HostImage>> {
        self.images
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .shift_remove(&id)
    }

    /// Number of open images.
    pub fn len(&self) -> usize {
        self.images.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns true if no image is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock every open image until the returned guard is dropped.
    pub fn lock_all(&self) -> AllImagesLock {
        let images: Vec<_> = self
            .images
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for image in &images {
            image.acquire();
        }
        tracing::trace!(count = images.len(), "locked host images");
        AllImagesLock { images }
    }
}

/// Holds every image that was open when [`ImageRegistry::lock_all`] ran.
///
/// Dropping it unlocks them and marks each for redisplay.
#[derive(Debug)]
pub struct AllImagesLock {
    images: Vec<Arc<HostImage>>,
}

impl AllImagesLock {
    /// Number of images held.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns true if no image was open.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl Drop for AllImagesLock {
    fn drop(&mut self) {
        for image in &self.images {
            image.release();
        }
        tracing::trace!(count = self.images.len(), "released host images");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::BitDepth;

    #[test]
    fn test_open_find_close() {
        let registry = ImageRegistry::new();
        let a = registry.open("a", ImageBuffer::new(2, 2, BitDepth::Gray8));
        let _b = registry.open("b", ImageBuffer::new(2, 2, BitDepth::Gray8));
        assert_eq!(registry.titles(), vec!["a", "b"]);
        assert_eq!(registry.find("a").unwrap().id(), a.id());

        assert!(registry.close(a.id()).is_some());
        assert!(registry.find("a").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lock_all_blocks_host_updates() {
        let registry = ImageRegistry::new();
        let image = registry.open("img", ImageBuffer::new(2, 2, BitDepth::Gray8));

        let guard = registry.lock_all();
        assert_eq!(guard.len(), 1);
        assert!(image.is_locked());
        assert!(matches!(
            image.update(|b| b.set(0, 0, 1.0)),
            Err(Error::ImageLocked(t)) if t == "img"
        ));
        drop(guard);

        assert!(!image.is_locked());
        assert_eq!(image.revision(), 1);
        assert!(image.update(|b| b.set(0, 0, 1.0)).unwrap());
    }

    #[test]
    fn test_nested_locks_are_counted() {
        let registry = ImageRegistry::new();
        let image = registry.open("img", ImageBuffer::new(1, 1, BitDepth::Float32));

        let outer = registry.lock_all();
        let inner = registry.lock_all();
        drop(inner);
        assert!(image.is_locked());
        drop(outer);
        assert!(!image.is_locked());
        assert_eq!(image.revision(), 2);
    }
}
