//! Reference-counted handles for objects handed to the host.
//!
//! A [`RefHandle`] is a bare pointer with C layout. Creating one takes one
//! strong reference on the underlying `Arc`; [`RefHandle::release`] gives that
//! reference back. The object itself stays owned by the bridge. The host must
//! release every handle it receives exactly once; double releases and leaks
//! cannot be detected here.

use std::fmt;
use std::ptr;
use std::sync::Arc;

#[repr(C)]
pub struct RefHandle<T> {
    ptr: *const T,
}

impl<T> RefHandle<T> {
    /// Hand one new reference to `object` across the boundary.
    pub fn wrap(object: &Arc<T>) -> Self {
        Self {
            ptr: Arc::into_raw(Arc::clone(object)),
        }
    }

    /// Take an additional reference through a pointer the host already holds.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from a handle that has not been released.
    pub unsafe fn from_raw(ptr: *const T) -> Self {
        if !ptr.is_null() {
            Arc::increment_strong_count(ptr);
        }
        Self { ptr }
    }

    /// A handle to nothing, returned when an object could not be created.
    pub fn null() -> Self {
        Self { ptr: ptr::null() }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    /// Borrow the object.
    ///
    /// # Safety
    ///
    /// The handle must not have been released.
    pub unsafe fn get(&self) -> Option<&T> {
        self.ptr.as_ref()
    }

    /// Clone out an owned `Arc`, leaving the handle's own reference intact.
    ///
    /// # Safety
    ///
    /// The handle must not have been released.
    pub unsafe fn to_arc(&self) -> Option<Arc<T>> {
        if self.ptr.is_null() {
            return None;
        }
        Arc::increment_strong_count(self.ptr);
        Some(Arc::from_raw(self.ptr))
    }

    /// Give the handle's reference back.
    ///
    /// # Safety
    ///
    /// Must be called once per handle obtained from [`RefHandle::wrap`] or
    /// [`RefHandle::from_raw`], and never on a copy of an already released
    /// handle.
    pub unsafe fn release(self) {
        if !self.ptr.is_null() {
            drop(Arc::from_raw(self.ptr));
        }
    }
}

impl<T> fmt::Debug for RefHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefHandle").field(&self.ptr).finish()
    }
}
