//! Blocking GSSAPI security context negotiation over any token transport.
//!
//! A [`ServerContext`] and a [`ClientContext`] exchange opaque tokens through a
//! [`TokenTransport`] until the [`Mechanism`] declares the context established. After that both
//! ends can seal, sign and verify messages.
//!
//! Mechanisms:
//! - [`mech::gssapi::Gssapi`] (feature `gssapi`) uses the system GSSAPI library
//! - [`mech::loopback::Loopback`] (feature `loopback`, on by default) authenticates with a shared
//!   secret and needs no infrastructure

pub mod client;
pub mod context;
pub mod cred;
pub mod error;
pub mod flags;
pub mod mech;
pub mod name;
pub mod oid;
pub mod server;
pub mod settings;
pub mod status;
pub mod transport;

pub use client::ClientContext;
pub use context::{Context, Message, Negotiated, Session};
pub use cred::CredentialUsage;
pub use error::{Error, ErrorReporter, Failure, StatusCodes, TracingReporter, describe_status};
pub use flags::{ContextFlag, ContextFlags, export_flags, flag_name};
pub use mech::{Mechanism, StepStatus};
pub use name::{NameType, export_name, export_oid, import_name};
pub use oid::Oid;
pub use server::ServerContext;
pub use settings::{InitSettings, TransportSettings};
pub use transport::{FnTransport, FramedTransport, TokenTransport, loopback_pair};
