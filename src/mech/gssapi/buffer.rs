use std::ffi::c_void;

use libgssapi_sys::{gss_buffer_desc, gss_release_buffer};

/// A buffer the library allocated, released on drop
pub(super) struct Buffer(pub(super) gss_buffer_desc);
impl Buffer {
    pub(super) fn empty() -> Self {
        Self(gss_buffer_desc {
            length: 0,
            value: std::ptr::null_mut(),
        })
    }
    pub(super) fn as_slice(&self) -> &[u8] {
        if self.0.value.is_null() || self.0.length == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.0.value as *const u8, self.0.length) }
    }
    pub(super) fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
    pub(super) fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_slice()).into_owned()
    }
}
impl Drop for Buffer {
    fn drop(&mut self) {
        if self.0.value.is_null() {
            return;
        }
        let mut _min = 0;
        let _maj = unsafe { gss_release_buffer(&mut _min, &mut self.0) };
    }
}

/// Borrows Rust memory as an input buffer. The library only reads it.
pub(super) fn borrowed(bytes: &[u8]) -> gss_buffer_desc {
    gss_buffer_desc {
        length: bytes.len(),
        value: bytes.as_ptr() as *mut c_void,
    }
}
