use std::fmt::Display;

use crate::{mech::Mechanism, status};

/// The failing mechanism function together with its major and minor status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusCodes {
    pub function: &'static str,
    pub major: u32,
    pub minor: u32,
}
impl StatusCodes {
    pub fn new(function: &'static str, major: u32, minor: u32) -> Self {
        Self { function, major, minor }
    }
}
impl Display for StatusCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed (major {:#x}, minor {:#x})", self.function, self.major, self.minor)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{operation}: {function} failed, error: {description}")]
    Mechanism {
        operation: &'static str,
        function: &'static str,
        major: u32,
        minor: u32,
        description: String,
    },
    #[error("no credentials have been acquired")]
    MissingCredential,
    #[error("token transport failed: {0}")]
    Transport(#[from] std::io::Error),
}
impl Error {
    /// The status codes of a mechanism failure
    pub fn codes(&self) -> Option<StatusCodes> {
        match self {
            Self::Mechanism {
                function, major, minor, ..
            } => Some(StatusCodes::new(*function, *major, *minor)),
            Self::MissingCredential | Self::Transport(_) => None,
        }
    }
    pub fn major(&self) -> Option<u32> {
        self.codes().map(|c| c.major)
    }
}

/// Two-part diagnostic for a status pair: `"<major text>, (<minor text>)"`
pub fn describe_status<M: Mechanism + ?Sized>(mech: &M, major: u32, minor: u32) -> String {
    let major_text = mech
        .display_status(major, status::GSS_C_GSS_CODE)
        .unwrap_or_else(|| format!("unknown status {major:#x}"));
    let minor_text = mech
        .display_status(minor, status::GSS_C_MECH_CODE)
        .unwrap_or_else(|| format!("unknown status {minor:#x}"));
    format!("{major_text}, ({minor_text})")
}

/// What an [`ErrorReporter`] gets to see of a failed mechanism call
#[derive(Clone, Copy, Debug)]
pub struct Failure<'a> {
    /// The context operation that was running
    pub operation: &'static str,
    pub codes: StatusCodes,
    pub description: &'a str,
}

/// Observer for mechanism failures.
///
/// Called once per failing mechanism call, before the failure is returned as an [`Error`].
pub trait ErrorReporter {
    fn report(&self, failure: &Failure<'_>);
}

/// Writes each failure as one `tracing` error event
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;
impl ErrorReporter for TracingReporter {
    fn report(&self, failure: &Failure<'_>) {
        tracing::error!(
            major = failure.codes.major,
            minor = failure.codes.minor,
            "{}: {} failed, error: {}",
            failure.operation,
            failure.codes.function,
            failure.description
        );
    }
}

impl<F: Fn(&Failure<'_>)> ErrorReporter for F {
    fn report(&self, failure: &Failure<'_>) {
        self(failure)
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use super::*;
    use crate::mech::loopback::{Loopback, minor};

    #[test]
    fn major_and_minor_text_are_joined() {
        let mech = Loopback::new(b"k");
        assert_eq!(
            describe_status(&mech, status::GSS_S_NO_CONTEXT, minor::BAD_INTEGRITY),
            "No context has been established, (Integrity check on a handshake token failed)"
        );
        assert_eq!(
            describe_status(&mech, status::GSS_S_COMPLETE, 0),
            "The routine completed successfully, (Success)"
        );
    }

    #[test]
    fn unknown_minor_codes_fall_back_to_hex() {
        let mech = Loopback::new(b"k");
        assert_eq!(
            describe_status(&mech, status::GSS_S_NO_CONTEXT, 0xbeef),
            "No context has been established, (unknown status 0xbeef)"
        );
    }

    #[test]
    fn mechanism_errors_keep_their_codes() {
        let mech = Loopback::new(b"k");
        let codes = StatusCodes::new("gss_unwrap", status::GSS_S_BAD_SIG, 0);
        assert_eq!(codes.to_string(), "gss_unwrap failed (major 0x60000, minor 0x0)");
        let err = Error::Mechanism {
            operation: "recv_message",
            function: codes.function,
            major: codes.major,
            minor: codes.minor,
            description: describe_status(&mech, codes.major, codes.minor),
        };
        assert_eq!(err.codes(), Some(codes));
        assert!(err.to_string().starts_with("recv_message: gss_unwrap failed, error: "));
        assert_eq!(Error::MissingCredential.major(), None);
    }
}
