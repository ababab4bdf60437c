//! The system GSSAPI library (MIT krb5 or Heimdal) as a [`Mechanism`].
//!
//! Credentials come from the usual places: the ticket cache for initiators and the keytab
//! (`KRB5_KTNAME`) for acceptors.

use std::{ffi::c_void, ptr::NonNull, time::Duration};

use libgssapi_sys::{
    gss_OID, gss_OID_desc, gss_OID_set, gss_accept_sec_context, gss_acquire_cred,
    gss_channel_bindings_struct, gss_cred_id_struct, gss_ctx_id_struct, gss_delete_sec_context, gss_display_name,
    gss_display_status, gss_get_mic, gss_import_name, gss_init_sec_context, gss_inquire_names_for_mech,
    gss_name_struct, gss_oid_to_str, gss_release_cred, gss_release_name, gss_release_oid_set, gss_unwrap,
    gss_verify_mic, gss_wrap,
};

use crate::{
    cred::CredentialUsage,
    error::StatusCodes,
    flags::ContextFlags,
    mech::{InitParams, Mechanism, StepOut, StepStatus, Unwrapped},
    oid::Oid,
    status,
};

mod buffer;

use buffer::{Buffer, borrowed};

const GSS_C_QOP_DEFAULT: u32 = 0;

/// The system GSSAPI library
#[derive(Clone, Copy, Debug, Default)]
pub struct Gssapi;

pub struct GssName(NonNull<gss_name_struct>);
// The handle is owned exclusively and the library does not tie it to a thread
unsafe impl Send for GssName {}
impl Drop for GssName {
    fn drop(&mut self) {
        let mut _s = 0;
        unsafe { gss_release_name(&mut _s, &mut self.0.as_ptr()) };
    }
}

pub struct GssCredential(NonNull<gss_cred_id_struct>);
unsafe impl Send for GssCredential {}
impl Drop for GssCredential {
    fn drop(&mut self) {
        let mut _s = 0;
        unsafe { gss_release_cred(&mut _s, &mut self.0.as_ptr()) };
    }
}

pub struct GssContext(NonNull<gss_ctx_id_struct>);
unsafe impl Send for GssContext {}
impl GssContext {
    fn as_ptr(&self) -> *mut gss_ctx_id_struct {
        self.0.as_ptr()
    }
}
impl Drop for GssContext {
    fn drop(&mut self) {
        let mut _s = 0;
        unsafe { gss_delete_sec_context(&mut _s, &mut self.0.as_ptr(), std::ptr::null_mut()) };
    }
}

/// Takes ownership of whatever context pointer the library left behind
fn adopt(context: &mut Option<GssContext>, ptr: *mut gss_ctx_id_struct) {
    let current = context.as_ref().map(GssContext::as_ptr);
    if current == Some(ptr) {
        return;
    }
    // The library already released or replaced the old handle
    if let Some(stale) = context.take() {
        std::mem::forget(stale);
    }
    *context = NonNull::new(ptr).map(GssContext);
}

/// Borrows an OID as the descriptor the library expects
fn oid_desc(oid: &Oid) -> gss_OID_desc {
    gss_OID_desc {
        length: oid.as_bytes().len() as u32,
        elements: oid.as_bytes().as_ptr() as *mut c_void,
    }
}

/// Copies an OID the library owns
unsafe fn copy_oid(oid: gss_OID) -> Option<Oid> {
    let oid = unsafe { oid.as_ref() }?;
    if oid.elements.is_null() {
        return None;
    }
    let bytes = unsafe { std::slice::from_raw_parts(oid.elements as *const u8, oid.length as usize) };
    Some(Oid::from_der(bytes))
}

fn lifetime(secs: u32) -> Option<Duration> {
    (secs != status::GSS_C_INDEFINITE).then(|| Duration::from_secs(secs.into()))
}

fn check(function: &'static str, major: u32, minor: u32) -> Result<(), StatusCodes> {
    if status::is_error(major) {
        Err(StatusCodes::new(function, major, minor))
    } else {
        Ok(())
    }
}

impl Mechanism for Gssapi {
    type Name = GssName;
    type Credential = GssCredential;
    type Context = GssContext;

    fn import_name(&self, name: &[u8], name_type: Option<&Oid>) -> Result<GssName, StatusCodes> {
        let mut minor = 0;
        let mut input = borrowed(name);
        let mut name_type = name_type.map(oid_desc);
        let mut output = std::ptr::null_mut();
        let major = unsafe {
            gss_import_name(
                &mut minor,
                &mut input,
                name_type.as_mut().map_or(std::ptr::null_mut(), std::ptr::from_mut),
                &mut output,
            )
        };
        check("gss_import_name", major, minor)?;
        NonNull::new(output)
            .map(GssName)
            .ok_or(StatusCodes::new("gss_import_name", status::GSS_S_FAILURE, minor))
    }

    fn display_name(&self, name: &GssName) -> Result<String, StatusCodes> {
        let mut minor = 0;
        let mut output = Buffer::empty();
        let major = unsafe { gss_display_name(&mut minor, name.0.as_ptr(), &mut output.0, std::ptr::null_mut()) };
        check("gss_display_name", major, minor)?;
        Ok(output.to_string_lossy())
    }

    fn oid_to_string(&self, oid: &Oid) -> Result<String, StatusCodes> {
        let mut minor = 0;
        let mut desc = oid_desc(oid);
        let mut output = Buffer::empty();
        let major = unsafe { gss_oid_to_str(&mut minor, &mut desc, &mut output.0) };
        check("gss_oid_to_str", major, minor)?;
        // Rendered as "{ 1 2 840 113554 1 2 2 }"
        let text = output.to_string_lossy();
        let arcs: Vec<&str> = text
            .trim_matches(|c: char| c == '{' || c == '}' || c.is_whitespace() || c == '\0')
            .split(|c: char| c.is_whitespace() || c == '.')
            .filter(|arc| !arc.is_empty())
            .collect();
        Ok(arcs.join("."))
    }

    fn display_status(&self, code: u32, status_type: i32) -> Option<String> {
        let mut parts = Vec::new();
        let mut message_context = 0;
        loop {
            let mut minor = 0;
            let mut output = Buffer::empty();
            let major = unsafe {
                gss_display_status(
                    &mut minor,
                    code,
                    status_type,
                    std::ptr::null_mut(),
                    &mut message_context,
                    &mut output.0,
                )
            };
            if status::is_error(major) {
                return None;
            }
            parts.push(output.to_string_lossy());
            if message_context == 0 {
                break;
            }
        }
        Some(parts.join("; "))
    }

    fn acquire_cred(&self, name: &GssName, usage: CredentialUsage) -> Result<GssCredential, StatusCodes> {
        let mut minor = 0;
        let mut cred = std::ptr::null_mut();
        let mut time_rec = 0;
        let major = unsafe {
            gss_acquire_cred(
                &mut minor,
                name.0.as_ptr(),
                status::GSS_C_INDEFINITE,
                std::ptr::null_mut(),
                usage.to_c(),
                &mut cred,
                std::ptr::null_mut(),
                &mut time_rec,
            )
        };
        check("gss_acquire_cred", major, minor)?;
        NonNull::new(cred)
            .map(GssCredential)
            .ok_or(StatusCodes::new("gss_acquire_cred", status::GSS_S_NO_CRED, minor))
    }

    fn init_sec_context(
        &self,
        context: &mut Option<GssContext>,
        cred: Option<&GssCredential>,
        target: &GssName,
        params: &InitParams<'_>,
        input: Option<&[u8]>,
    ) -> StepOut<GssName> {
        let mut minor = 0;
        let mut ctx_ptr = context.as_ref().map_or(std::ptr::null_mut(), GssContext::as_ptr);
        let mut mech = params.mech.map(oid_desc);
        let mut input = input.map(borrowed);
        let mut actual_mech: gss_OID = std::ptr::null_mut();
        let mut output = Buffer::empty();
        let mut ret_flags = 0;
        let mut time_rec = 0;
        let major = unsafe {
            gss_init_sec_context(
                &mut minor,
                cred.map_or(std::ptr::null_mut(), |c| c.0.as_ptr()),
                &mut ctx_ptr,
                target.0.as_ptr(),
                mech.as_mut().map_or(std::ptr::null_mut(), std::ptr::from_mut),
                params.flags.bits(),
                params
                    .lifetime
                    .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(status::GSS_C_INDEFINITE)),
                std::ptr::null_mut::<gss_channel_bindings_struct>(),
                input.as_mut().map_or(std::ptr::null_mut(), std::ptr::from_mut),
                &mut actual_mech,
                &mut output.0,
                &mut ret_flags,
                &mut time_rec,
            )
        };
        adopt(context, ctx_ptr);
        step_out(
            "gss_init_sec_context",
            major,
            minor,
            output,
            actual_mech,
            ret_flags,
            time_rec,
            None,
        )
    }

    fn accept_sec_context(
        &self,
        context: &mut Option<GssContext>,
        cred: &GssCredential,
        input: &[u8],
    ) -> StepOut<GssName> {
        let mut minor = 0;
        let mut ctx_ptr = context.as_ref().map_or(std::ptr::null_mut(), GssContext::as_ptr);
        let mut input = borrowed(input);
        let mut source: *mut gss_name_struct = std::ptr::null_mut();
        let mut actual_mech: gss_OID = std::ptr::null_mut();
        let mut output = Buffer::empty();
        let mut ret_flags = 0;
        let mut time_rec = 0;
        let major = unsafe {
            gss_accept_sec_context(
                &mut minor,
                &mut ctx_ptr,
                cred.0.as_ptr(),
                &mut input,
                std::ptr::null_mut::<gss_channel_bindings_struct>(),
                &mut source,
                &mut actual_mech,
                &mut output.0,
                &mut ret_flags,
                &mut time_rec,
                std::ptr::null_mut(),
            )
        };
        adopt(context, ctx_ptr);
        step_out(
            "gss_accept_sec_context",
            major,
            minor,
            output,
            actual_mech,
            ret_flags,
            time_rec,
            NonNull::new(source).map(GssName),
        )
    }

    fn wrap(&self, context: &mut GssContext, encrypt: bool, message: &[u8]) -> Result<Vec<u8>, StatusCodes> {
        let mut minor = 0;
        let mut input = borrowed(message);
        let mut conf_state = 0;
        let mut output = Buffer::empty();
        let major = unsafe {
            gss_wrap(
                &mut minor,
                context.as_ptr(),
                i32::from(encrypt),
                GSS_C_QOP_DEFAULT,
                &mut input,
                &mut conf_state,
                &mut output.0,
            )
        };
        check("gss_wrap", major, minor)?;
        if encrypt && conf_state == 0 {
            return Err(StatusCodes::new("gss_wrap", status::GSS_S_UNAVAILABLE, minor));
        }
        Ok(output.to_vec())
    }

    fn unwrap(&self, context: &mut GssContext, token: &[u8]) -> Result<Unwrapped, StatusCodes> {
        let mut minor = 0;
        let mut input = borrowed(token);
        let mut output = Buffer::empty();
        let mut conf_state = 0;
        let major = unsafe {
            gss_unwrap(
                &mut minor,
                context.as_ptr(),
                &mut input,
                &mut output.0,
                &mut conf_state,
                std::ptr::null_mut(),
            )
        };
        check("gss_unwrap", major, minor)?;
        Ok(Unwrapped {
            data: output.to_vec(),
            encrypted: conf_state != 0,
        })
    }

    fn get_mic(&self, context: &mut GssContext, message: &[u8]) -> Result<Vec<u8>, StatusCodes> {
        let mut minor = 0;
        let mut input = borrowed(message);
        let mut output = Buffer::empty();
        let major = unsafe { gss_get_mic(&mut minor, context.as_ptr(), GSS_C_QOP_DEFAULT, &mut input, &mut output.0) };
        check("gss_get_mic", major, minor)?;
        Ok(output.to_vec())
    }

    fn verify_mic(&self, context: &mut GssContext, message: &[u8], token: &[u8]) -> Result<(), StatusCodes> {
        let mut minor = 0;
        let mut message = borrowed(message);
        let mut token = borrowed(token);
        let major = unsafe {
            gss_verify_mic(
                &mut minor,
                context.as_ptr(),
                &mut message,
                &mut token,
                std::ptr::null_mut(),
            )
        };
        check("gss_verify_mic", major, minor)
    }

    fn inquire_names_for_mech(&self, mech: &Oid) -> Result<Vec<Oid>, StatusCodes> {
        let mut minor = 0;
        let mut mech = oid_desc(mech);
        let mut set: gss_OID_set = std::ptr::null_mut();
        let major = unsafe { gss_inquire_names_for_mech(&mut minor, &mut mech, &mut set) };
        check("gss_inquire_names_for_mech", major, minor)?;
        let Some(desc) = (unsafe { set.as_ref() }) else {
            return Ok(Vec::new());
        };
        let oids = if desc.elements.is_null() {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(desc.elements, desc.count) }
                .iter()
                .filter_map(|oid| unsafe { copy_oid(std::ptr::from_ref(oid).cast_mut()) })
                .collect()
        };
        let mut _min = 0;
        unsafe { gss_release_oid_set(&mut _min, &mut set) };
        Ok(oids)
    }
}

#[allow(clippy::too_many_arguments)]
fn step_out(
    function: &'static str,
    major: u32,
    minor: u32,
    output: Buffer,
    actual_mech: gss_OID,
    ret_flags: u32,
    time_rec: u32,
    source_name: Option<GssName>,
) -> StepOut<GssName> {
    let token = output.to_vec();
    let token = (!token.is_empty()).then_some(token);
    if status::is_error(major) {
        let failed = StepOut::failed(StatusCodes::new(function, major, minor));
        return match token {
            Some(token) => failed.with_token(token),
            None => failed,
        };
    }
    let status = if major & status::GSS_S_CONTINUE_NEEDED != 0 {
        StepStatus::Continue
    } else {
        StepStatus::Complete
    };
    StepOut {
        status,
        token,
        mech: unsafe { copy_oid(actual_mech) },
        flags: ContextFlags::from_bits_truncate(ret_flags),
        time_rec: lifetime(time_rec),
        source_name,
    }
}
