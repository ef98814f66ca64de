// MIT License
//
// Copyright (c) 2026 Raja Lehtihet & Wael El Oraiby
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
//
//! Named, contiguous byte slabs shared between sketch replicas.
//!
//! A [`Slab`] is the crate's stand-in for the distilled spec's named
//! POSIX shared-memory block: a byte-addressable region, allocated once by an
//! *owner*, that any number of *attachers* can map onto without copying. The
//! parallel driver in [`crate::parallel`] relies on every worker thread
//! attaching its assigned sketch by name rather than cloning data.
//!
//! Two handles that attach to the same name always observe the same bytes —
//! writes through one handle are immediately visible through the other,
//! because both ultimately point at the same allocation. This crate runs
//! workers as threads in one address space (see `SPEC_FULL.md` §5), so a name
//! lookup is a registry lookup rather than a `shm_open` syscall; a caller that
//! spawns real OS processes can layer `shm_open`/`mmap` underneath the same
//! `SlabName` scheme without touching any sketch code.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{Result, SketchError};

/// Every slab is allocated with this alignment, which is sufficient for the
/// `u8`/`u32`/`u64` fields every sketch lays out inside one.
const SLAB_ALIGN: usize = 8;

/// Rounds `offset` up to the next multiple of `align`.
pub(crate) const fn pad_to(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

/// Opaque name identifying a slab. Scoped to this process (or, for a caller
/// layering real shared memory underneath, to this host).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SlabName(Arc<str>);

impl SlabName {
    /// Wraps an explicit name, e.g. one received from another worker.
    pub fn new(name: impl Into<String>) -> Self {
        SlabName(Arc::from(name.into()))
    }

    /// Generates a unique name for a new owned slab.
    pub fn generate(prefix: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        SlabName(Arc::from(format!(
            "/sketchdrive-{}-{prefix}-{id}",
            std::process::id()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SlabName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlabName({:?})", self.0)
    }
}

impl fmt::Display for SlabName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct RawBytes {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: `RawBytes` is a bare allocation; exclusive-access discipline is
// enforced by the sketch layout code that carves disjoint field ranges out
// of it, not by this type.
unsafe impl Send for RawBytes {}
unsafe impl Sync for RawBytes {}

impl RawBytes {
    fn zeroed(len: usize) -> Self {
        let alloc_len = len.max(1);
        let layout = Layout::from_size_align(alloc_len, SLAB_ALIGN).expect("valid slab layout");
        // SAFETY: `alloc_len` is non-zero, so `alloc_zeroed` either returns a
        // valid pointer for `layout` or null, which we check below.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        RawBytes { ptr, len }
    }
}

impl Drop for RawBytes {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.len.max(1), SLAB_ALIGN).expect("valid slab layout");
        // SAFETY: `self.ptr` was allocated by `alloc_zeroed` with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

struct RegistryEntry {
    bytes: Arc<RawBytes>,
    attachers: Arc<AtomicUsize>,
}

fn registry() -> &'static Mutex<HashMap<String, RegistryEntry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, RegistryEntry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A handle onto a named byte slab: either the owner or an attacher.
pub struct Slab {
    name: SlabName,
    bytes: Arc<RawBytes>,
    attachers: Arc<AtomicUsize>,
    owner: bool,
    released: bool,
}

impl Slab {
    /// Creates and owns a new slab of `len` bytes, zero-initialized.
    ///
    /// # Errors
    /// Returns [`SketchError::Slab`] if `name` is already in use.
    pub fn create(name: SlabName, len: usize) -> Result<Self> {
        let mut reg = registry().lock().expect("slab registry poisoned");
        if reg.contains_key(name.as_str()) {
            return Err(SketchError::Slab(format!("slab {name} already exists")));
        }
        let bytes = Arc::new(RawBytes::zeroed(len));
        let attachers = Arc::new(AtomicUsize::new(0));
        reg.insert(
            name.as_str().to_owned(),
            RegistryEntry {
                bytes: bytes.clone(),
                attachers: attachers.clone(),
            },
        );
        tracing::debug!(slab = %name, bytes = len, "slab created");
        Ok(Slab {
            name,
            bytes,
            attachers,
            owner: true,
            released: false,
        })
    }

    /// Attaches to an existing owner's slab without copying.
    ///
    /// # Errors
    /// Returns [`SketchError::Slab`] if no slab with this name exists.
    pub fn attach(name: &SlabName) -> Result<Self> {
        let reg = registry().lock().expect("slab registry poisoned");
        let entry = reg
            .get(name.as_str())
            .ok_or_else(|| SketchError::Slab(format!("no such slab: {name}")))?;
        entry.attachers.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(slab = %name, "slab attached");
        Ok(Slab {
            name: name.clone(),
            bytes: entry.bytes.clone(),
            attachers: entry.attachers.clone(),
            owner: false,
            released: false,
        })
    }

    /// The name this handle was created or attached with.
    pub fn name(&self) -> &SlabName {
        &self.name
    }

    /// Total byte length of the slab.
    pub fn len(&self) -> usize {
        self.bytes.len
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len == 0
    }

    /// `true` if this handle owns the slab (created it, rather than attached).
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Number of live attacher handles (handles created via [`Slab::attach`],
    /// not counting the owner).
    pub fn attacher_count(&self) -> usize {
        self.attachers.load(Ordering::SeqCst)
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `self.bytes` outlives this borrow and `len` matches the
        // allocation.
        unsafe { std::slice::from_raw_parts(self.bytes.ptr.as_ptr(), self.bytes.len) }
    }

    /// Mutable view over the whole slab.
    ///
    /// # Safety contract
    /// Every sketch built on top of a `Slab` partitions this byte range into
    /// disjoint field ranges (see `cms::layout`, `hh::layout`); as long as
    /// callers only write through the views derived from that partition, two
    /// handles can safely call this concurrently from different threads.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn as_bytes_mut(&self) -> &mut [u8] {
        // SAFETY: see the safety contract on this method.
        unsafe { std::slice::from_raw_parts_mut(self.bytes.ptr.as_ptr(), self.bytes.len) }
    }

    /// Consumes this handle, releasing its claim on the slab.
    ///
    /// For an attacher, this simply detaches. For the owner, this unlinks
    /// the backing storage — but only if no attachers remain live; otherwise
    /// it fails loudly rather than unlinking memory other handles still see.
    ///
    /// # Errors
    /// Returns [`SketchError::ResourceLeak`] if the owner releases while
    /// attachers are still live.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        if !self.owner {
            self.attachers.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(slab = %self.name, "slab detached");
            return Ok(());
        }

        let live = self.attachers.load(Ordering::SeqCst);
        if live > 0 {
            return Err(SketchError::ResourceLeak(live, self.name.as_str().to_owned()));
        }
        registry().lock().expect("slab registry poisoned").remove(self.name.as_str());
        tracing::debug!(slab = %self.name, "slab unlinked");
        Ok(())
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.owner {
            let live = self.attachers.load(Ordering::SeqCst);
            if live > 0 {
                tracing::error!(
                    slab = %self.name,
                    live_attachers = live,
                    "owned slab dropped with live attachers; call release() to surface this as an error instead"
                );
            }
            registry().lock().expect("slab registry poisoned").remove(self.name.as_str());
        } else {
            self.attachers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Reinterprets a byte range of `bytes` as a `&[T]`.
///
/// # Safety
/// `offset` must be a multiple of `align_of::<T>()` and
/// `offset + count * size_of::<T>()` must not exceed `bytes.len()`.
pub(crate) unsafe fn typed_slice<T>(bytes: &[u8], offset: usize, count: usize) -> &[T] {
    debug_assert_eq!(offset % std::mem::align_of::<T>(), 0, "misaligned slab view");
    debug_assert!(offset + count * std::mem::size_of::<T>() <= bytes.len());
    unsafe { std::slice::from_raw_parts(bytes.as_ptr().add(offset) as *const T, count) }
}

/// Mutable counterpart of [`typed_slice`].
///
/// # Safety
/// Same preconditions as [`typed_slice`].
pub(crate) unsafe fn typed_slice_mut<T>(bytes: &mut [u8], offset: usize, count: usize) -> &mut [T] {
    debug_assert_eq!(offset % std::mem::align_of::<T>(), 0, "misaligned slab view");
    debug_assert!(offset + count * std::mem::size_of::<T>() <= bytes.len());
    unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr().add(offset) as *mut T, count) }
}
