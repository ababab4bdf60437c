//! Major status codes as laid out by RFC 2744.
//!
//! A major status packs three fields: the calling error in the top byte, the routine error in the
//! next byte and supplementary information bits in the low 16 bits.

pub const GSS_S_COMPLETE: u32 = 0;

const CALLING_ERROR_OFFSET: u32 = 24;
const ROUTINE_ERROR_OFFSET: u32 = 16;
const CALLING_ERROR_MASK: u32 = 0xff << CALLING_ERROR_OFFSET;
const ROUTINE_ERROR_MASK: u32 = 0xff << ROUTINE_ERROR_OFFSET;
const SUPPLEMENTARY_MASK: u32 = 0xffff;

pub const GSS_S_CALL_INACCESSIBLE_READ: u32 = 1 << CALLING_ERROR_OFFSET;
pub const GSS_S_CALL_INACCESSIBLE_WRITE: u32 = 2 << CALLING_ERROR_OFFSET;
pub const GSS_S_CALL_BAD_STRUCTURE: u32 = 3 << CALLING_ERROR_OFFSET;

pub const GSS_S_BAD_MECH: u32 = 1 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_BAD_NAME: u32 = 2 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_BAD_NAMETYPE: u32 = 3 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_BAD_BINDINGS: u32 = 4 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_BAD_STATUS: u32 = 5 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_BAD_SIG: u32 = 6 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_BAD_MIC: u32 = GSS_S_BAD_SIG;
pub const GSS_S_NO_CRED: u32 = 7 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_NO_CONTEXT: u32 = 8 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_DEFECTIVE_TOKEN: u32 = 9 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_DEFECTIVE_CREDENTIAL: u32 = 10 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_CREDENTIALS_EXPIRED: u32 = 11 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_CONTEXT_EXPIRED: u32 = 12 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_FAILURE: u32 = 13 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_BAD_QOP: u32 = 14 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_UNAUTHORIZED: u32 = 15 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_UNAVAILABLE: u32 = 16 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_DUPLICATE_ELEMENT: u32 = 17 << ROUTINE_ERROR_OFFSET;
pub const GSS_S_NAME_NOT_MN: u32 = 18 << ROUTINE_ERROR_OFFSET;

pub const GSS_S_CONTINUE_NEEDED: u32 = 1;
pub const GSS_S_DUPLICATE_TOKEN: u32 = 1 << 1;
pub const GSS_S_OLD_TOKEN: u32 = 1 << 2;
pub const GSS_S_UNSEQ_TOKEN: u32 = 1 << 3;
pub const GSS_S_GAP_TOKEN: u32 = 1 << 4;

/// `status_type` selector for `gss_display_status`
pub const GSS_C_GSS_CODE: i32 = 1;
/// `status_type` selector for `gss_display_status`
pub const GSS_C_MECH_CODE: i32 = 2;

/// Lifetime value meaning "does not expire"
pub const GSS_C_INDEFINITE: u32 = u32::MAX;

/// True for any calling or routine error
pub fn is_error(major: u32) -> bool {
    major & (CALLING_ERROR_MASK | ROUTINE_ERROR_MASK) != 0
}
pub fn routine_error(major: u32) -> u32 {
    major & ROUTINE_ERROR_MASK
}
pub fn calling_error(major: u32) -> u32 {
    major & CALLING_ERROR_MASK
}
pub fn supplementary_info(major: u32) -> u32 {
    major & SUPPLEMENTARY_MASK
}

/// English text for every field set in a major status, joined with `"; "`
pub fn major_description(major: u32) -> String {
    if major == GSS_S_COMPLETE {
        return "The routine completed successfully".to_owned();
    }
    let mut parts: Vec<&str> = Vec::new();
    match calling_error(major) {
        0 => {}
        GSS_S_CALL_INACCESSIBLE_READ => parts.push("A required input parameter could not be read"),
        GSS_S_CALL_INACCESSIBLE_WRITE => parts.push("A required output parameter could not be written"),
        GSS_S_CALL_BAD_STRUCTURE => parts.push("A parameter was malformed"),
        _ => parts.push("An unknown calling error occurred"),
    }
    match routine_error(major) {
        0 => {}
        GSS_S_BAD_MECH => parts.push("An unsupported mechanism was requested"),
        GSS_S_BAD_NAME => parts.push("An invalid name was supplied"),
        GSS_S_BAD_NAMETYPE => parts.push("A supplied name was of an unsupported type"),
        GSS_S_BAD_BINDINGS => parts.push("Incorrect channel bindings were supplied"),
        GSS_S_BAD_STATUS => parts.push("An invalid status code was supplied"),
        GSS_S_BAD_SIG => parts.push("A token had an invalid MIC"),
        GSS_S_NO_CRED => {
            parts.push("No credentials were supplied, or the credentials were unavailable or inaccessible")
        }
        GSS_S_NO_CONTEXT => parts.push("No context has been established"),
        GSS_S_DEFECTIVE_TOKEN => parts.push("A token was invalid"),
        GSS_S_DEFECTIVE_CREDENTIAL => parts.push("A credential was invalid"),
        GSS_S_CREDENTIALS_EXPIRED => parts.push("The referenced credentials have expired"),
        GSS_S_CONTEXT_EXPIRED => parts.push("The context has expired"),
        GSS_S_FAILURE => parts.push("Unspecified GSS failure.  Minor code may provide more information"),
        GSS_S_BAD_QOP => parts.push("The quality-of-protection requested could not be provided"),
        GSS_S_UNAUTHORIZED => parts.push("The operation is forbidden by local security policy"),
        GSS_S_UNAVAILABLE => parts.push("The operation or option is unavailable"),
        GSS_S_DUPLICATE_ELEMENT => parts.push("The requested credential element already exists"),
        GSS_S_NAME_NOT_MN => parts.push("The provided name was not a mechanism name"),
        _ => parts.push("An unknown routine error occurred"),
    }
    let supplementary = supplementary_info(major);
    for (bit, text) in [
        (GSS_S_CONTINUE_NEEDED, "The routine must be called again to complete its function"),
        (GSS_S_DUPLICATE_TOKEN, "The token was a duplicate of an earlier token"),
        (GSS_S_OLD_TOKEN, "The token's validity period has expired"),
        (GSS_S_UNSEQ_TOKEN, "A later token has already been processed"),
        (GSS_S_GAP_TOKEN, "An expected per-message token was not received"),
    ] {
        if supplementary & bit != 0 {
            parts.push(text);
        }
    }
    if parts.is_empty() {
        return format!("Unknown major status {major:#x}");
    }
    parts.join("; ")
}
