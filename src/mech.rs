//! The seam between the context layer and the library doing the actual cryptography.
//!
//! A [`Mechanism`] is a GSSAPI implementation seen through owned handle types: every name,
//! credential and context it hands out is released by dropping it.

use std::time::Duration;

use crate::{cred::CredentialUsage, error::StatusCodes, flags::ContextFlags, oid::Oid};

#[cfg(feature = "gssapi")]
pub mod gssapi;
#[cfg(feature = "loopback")]
pub mod loopback;

pub trait Mechanism {
    type Name;
    type Credential;
    type Context;

    fn import_name(&self, name: &[u8], name_type: Option<&Oid>) -> Result<Self::Name, StatusCodes>;
    fn display_name(&self, name: &Self::Name) -> Result<String, StatusCodes>;
    fn oid_to_string(&self, oid: &Oid) -> Result<String, StatusCodes>;
    /// Text for a status value, `status_type` being `GSS_C_GSS_CODE` or `GSS_C_MECH_CODE`.
    /// `None` when the lookup itself failed.
    fn display_status(&self, code: u32, status_type: i32) -> Option<String>;
    fn acquire_cred(&self, name: &Self::Name, usage: CredentialUsage) -> Result<Self::Credential, StatusCodes>;

    /// One initiator round. `context` is `None` on the first call and holds whatever the mechanism
    /// created afterwards, also when the step failed.
    fn init_sec_context(
        &self,
        context: &mut Option<Self::Context>,
        cred: Option<&Self::Credential>,
        target: &Self::Name,
        params: &InitParams<'_>,
        input: Option<&[u8]>,
    ) -> StepOut<Self::Name>;
    /// One acceptor round, same contract as [`Mechanism::init_sec_context`]
    fn accept_sec_context(
        &self,
        context: &mut Option<Self::Context>,
        cred: &Self::Credential,
        input: &[u8],
    ) -> StepOut<Self::Name>;

    fn wrap(&self, context: &mut Self::Context, encrypt: bool, message: &[u8]) -> Result<Vec<u8>, StatusCodes>;
    fn unwrap(&self, context: &mut Self::Context, token: &[u8]) -> Result<Unwrapped, StatusCodes>;
    fn get_mic(&self, context: &mut Self::Context, message: &[u8]) -> Result<Vec<u8>, StatusCodes>;
    fn verify_mic(&self, context: &mut Self::Context, message: &[u8], token: &[u8]) -> Result<(), StatusCodes>;

    /// The name types the given mechanism understands
    fn inquire_names_for_mech(&self, mech: &Oid) -> Result<Vec<Oid>, StatusCodes>;
}

/// What the initiator asks for
#[derive(Clone, Copy, Debug)]
pub struct InitParams<'a> {
    pub flags: ContextFlags,
    pub lifetime: Option<Duration>,
    /// `None` lets the library pick its default mechanism
    pub mech: Option<&'a Oid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    Continue,
    Complete,
    Failed(StatusCodes),
}

/// Result of a single negotiation round.
///
/// A token may come with any status; a failed step can still produce an error token for the peer.
#[derive(Debug)]
pub struct StepOut<N> {
    pub status: StepStatus,
    pub token: Option<Vec<u8>>,
    pub mech: Option<Oid>,
    pub flags: ContextFlags,
    /// `None` means indefinite
    pub time_rec: Option<Duration>,
    /// Authenticated initiator, filled in by acceptors
    pub source_name: Option<N>,
}
impl<N> StepOut<N> {
    pub fn failed(codes: StatusCodes) -> Self {
        Self {
            status: StepStatus::Failed(codes),
            token: None,
            mech: None,
            flags: ContextFlags::empty(),
            time_rec: None,
            source_name: None,
        }
    }
    pub fn with_token(self, token: Vec<u8>) -> Self {
        Self {
            token: Some(token),
            ..self
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unwrapped {
    pub data: Vec<u8>,
    pub encrypted: bool,
}
