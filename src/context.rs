//! State and operations shared by both ends of a security context.

use std::{
    ops::{Deref, DerefMut},
    time::{Duration, Instant},
};

use crate::{
    client::ClientContext,
    cred::CredentialUsage,
    error::{Error, ErrorReporter, Failure, StatusCodes, TracingReporter, describe_status},
    flags::ContextFlags,
    mech::Mechanism,
    name::{NameType, export_oid, import_name},
    oid::Oid,
    server::ServerContext,
    status,
    transport::TokenTransport,
};

/// What the mechanism settled on, available once the context is established
#[derive(Clone, Debug)]
pub struct Negotiated {
    pub mech: Option<Oid>,
    pub flags: ContextFlags,
    /// `None` means the context does not expire
    pub time_rec: Option<Duration>,
    pub established_at: Instant,
}
impl Negotiated {
    pub fn valid_until(&self) -> Option<Instant> {
        self.time_rec.map(|t| self.established_at + t)
    }
}

/// A received application message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub data: Vec<u8>,
    /// Whether the peer sealed the message or only protected its integrity
    pub was_encrypted: bool,
}

/// One end of a security context.
///
/// Owns every handle it obtains from the mechanism. Each of them is released exactly once, when it
/// is replaced or when the context is dropped.
pub struct Context<M: Mechanism, T> {
    // Field order is release order
    pub(crate) peer_name: Option<M::Name>,
    pub(crate) context: Option<M::Context>,
    pub(crate) service_name: Option<M::Name>,
    pub(crate) cred: Option<M::Credential>,
    pub(crate) cred_usage: CredentialUsage,
    pub(crate) negotiated: Option<Negotiated>,
    pub(crate) mech: M,
    pub(crate) transport: T,
    reporter: Box<dyn ErrorReporter + Send>,
}

impl<M: Mechanism, T> Context<M, T> {
    pub fn new(mech: M, transport: T) -> Self {
        Self {
            peer_name: None,
            context: None,
            service_name: None,
            cred: None,
            cred_usage: CredentialUsage::default(),
            negotiated: None,
            mech,
            transport,
            reporter: Box::new(TracingReporter),
        }
    }
    /// Replaces the default [`TracingReporter`]
    #[must_use]
    pub fn with_reporter(self, reporter: impl ErrorReporter + Send + 'static) -> Self {
        Self {
            reporter: Box::new(reporter),
            ..self
        }
    }
    pub fn mechanism(&self) -> &M {
        &self.mech
    }
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Imports `name` and acquires credentials for it, replacing whatever was held before.
    ///
    /// On failure no credential is held afterwards.
    pub fn acquire_credential(&mut self, name: &str, name_type: NameType, usage: CredentialUsage) -> Result<(), Error> {
        const OPERATION: &str = "acquire_credential";
        self.service_name = None;
        self.cred = None;
        let service = import_name(&self.mech, name, name_type).map_err(|codes| self.report(OPERATION, codes))?;
        let cred = self
            .mech
            .acquire_cred(&service, usage)
            .map_err(|codes| self.report(OPERATION, codes))?;
        tracing::debug!(name, %usage, "acquired credentials");
        self.service_name = Some(service);
        self.cred = Some(cred);
        self.cred_usage = usage;
        Ok(())
    }
    pub fn acquire_accept_credential(&mut self, name: &str, name_type: NameType) -> Result<(), Error> {
        self.acquire_credential(name, name_type, CredentialUsage::Accept)
    }
    pub fn has_credential(&self) -> bool {
        self.cred.is_some()
    }

    /// The authenticated initiator on an acceptor, the target on an initiator
    pub fn source_name(&self) -> Option<&M::Name> {
        self.peer_name.as_ref()
    }
    /// The identity credentials were acquired for
    pub fn service_name(&self) -> Option<&M::Name> {
        self.service_name.as_ref()
    }
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }
    pub fn is_established(&self) -> bool {
        self.negotiated.is_some()
    }
    pub fn mech_type(&self) -> Option<&Oid> {
        self.negotiated.as_ref()?.mech.as_ref()
    }
    /// Granted flags, empty before establishment
    pub fn support_flags(&self) -> ContextFlags {
        self.negotiated.as_ref().map_or(ContextFlags::empty(), |n| n.flags)
    }
    pub fn time_rec(&self) -> Option<Duration> {
        self.negotiated.as_ref()?.time_rec
    }
    pub fn valid_until(&self) -> Option<Instant> {
        self.negotiated.as_ref()?.valid_until()
    }
    pub fn is_expired(&self) -> bool {
        self.valid_until().is_some_and(|until| Instant::now() >= until)
    }

    /// The name types the negotiated mechanism supports, rendered as dotted OIDs.
    ///
    /// Entries that cannot be rendered are reported and left out.
    pub fn mech_names(&self) -> Vec<String> {
        const OPERATION: &str = "mech_names";
        let Some(mech) = self.mech_type() else {
            return Vec::new();
        };
        let name_types = match self.mech.inquire_names_for_mech(mech) {
            Ok(name_types) => name_types,
            Err(codes) => {
                self.report(OPERATION, codes);
                return Vec::new();
            }
        };
        name_types
            .iter()
            .filter_map(|oid| export_oid(&self.mech, oid).map_err(|codes| self.report(OPERATION, codes)).ok())
            .collect()
    }

    /// Passes a mechanism failure to the reporter and turns it into an [`Error`]
    pub(crate) fn report(&self, operation: &'static str, codes: StatusCodes) -> Error {
        let description = describe_status(&self.mech, codes.major, codes.minor);
        self.reporter.report(&Failure {
            operation,
            codes,
            description: &description,
        });
        Error::Mechanism {
            operation,
            function: codes.function,
            major: codes.major,
            minor: codes.minor,
            description,
        }
    }

    /// Forgets the previous negotiation, releasing peer name and context
    pub(crate) fn reset(&mut self) {
        self.negotiated = None;
        self.peer_name = None;
        self.context = None;
    }
    pub(crate) fn establish(&mut self, mech: Option<Oid>, flags: ContextFlags, time_rec: Option<Duration>) {
        let negotiated = Negotiated {
            mech,
            flags,
            time_rec,
            established_at: Instant::now(),
        };
        tracing::info!(
            mech = negotiated.mech.as_ref().map(ToString::to_string).as_deref().unwrap_or("unknown"),
            flags = ?negotiated.flags,
            "security context established"
        );
        self.negotiated = Some(negotiated);
    }

    fn protected<R>(
        &mut self,
        function: &'static str,
        op: impl FnOnce(&M, &mut M::Context) -> Result<R, StatusCodes>,
    ) -> Result<R, StatusCodes> {
        match (&self.negotiated, self.context.as_mut()) {
            (Some(_), Some(context)) => op(&self.mech, context),
            _ => Err(StatusCodes::new(function, status::GSS_S_NO_CONTEXT, 0)),
        }
    }
    fn require_established(&self, operation: &'static str, function: &'static str) -> Result<(), Error> {
        match (&self.negotiated, &self.context) {
            (Some(_), Some(_)) => Ok(()),
            _ => Err(self.report(operation, StatusCodes::new(function, status::GSS_S_NO_CONTEXT, 0))),
        }
    }
}

impl<M: Mechanism, T: TokenTransport> Context<M, T> {
    /// Wraps `message` and sends it as one token. Nothing is sent if wrapping fails.
    pub fn send_message(&mut self, message: &[u8], encrypt: bool) -> Result<(), Error> {
        let token = self
            .protected("gss_wrap", |mech, ctx| mech.wrap(ctx, encrypt, message))
            .map_err(|codes| self.report("send_message", codes))?;
        self.transport.send_token(&token)?;
        Ok(())
    }
    /// Receives one token and unwraps it
    pub fn recv_message(&mut self) -> Result<Message, Error> {
        const OPERATION: &str = "recv_message";
        self.require_established(OPERATION, "gss_unwrap")?;
        let token = self.transport.recv_token()?;
        let unwrapped = self
            .protected("gss_unwrap", |mech, ctx| mech.unwrap(ctx, &token))
            .map_err(|codes| self.report(OPERATION, codes))?;
        Ok(Message {
            data: unwrapped.data,
            was_encrypted: unwrapped.encrypted,
        })
    }
    /// Sends a detached MIC over `message`, but not the message itself
    pub fn send_mic(&mut self, message: &[u8]) -> Result<(), Error> {
        let token = self
            .protected("gss_get_mic", |mech, ctx| mech.get_mic(ctx, message))
            .map_err(|codes| self.report("send_mic", codes))?;
        self.transport.send_token(&token)?;
        Ok(())
    }
    /// Receives one token and checks it is a valid MIC over `message`
    pub fn recv_mic(&mut self, message: &[u8]) -> Result<(), Error> {
        const OPERATION: &str = "recv_mic";
        self.require_established(OPERATION, "gss_verify_mic")?;
        let token = self.transport.recv_token()?;
        self.protected("gss_verify_mic", |mech, ctx| mech.verify_mic(ctx, message, &token))
            .map_err(|codes| self.report(OPERATION, codes))
    }
}

/// Either end of a context
pub enum Session<M: Mechanism, T> {
    Acceptor(ServerContext<M, T>),
    Initiator(ClientContext<M, T>),
}
impl<M: Mechanism, T> Session<M, T> {
    pub fn is_acceptor(&self) -> bool {
        matches!(self, Self::Acceptor(_))
    }
}
impl<M: Mechanism, T> Deref for Session<M, T> {
    type Target = Context<M, T>;
    fn deref(&self) -> &Self::Target {
        match self {
            Self::Acceptor(server) => server,
            Self::Initiator(client) => client,
        }
    }
}
impl<M: Mechanism, T> DerefMut for Session<M, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Acceptor(server) => server,
            Self::Initiator(client) => client,
        }
    }
}
impl<M: Mechanism, T> From<ServerContext<M, T>> for Session<M, T> {
    fn from(server: ServerContext<M, T>) -> Self {
        Self::Acceptor(server)
    }
}
impl<M: Mechanism, T> From<ClientContext<M, T>> for Session<M, T> {
    fn from(client: ClientContext<M, T>) -> Self {
        Self::Initiator(client)
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        thread,
    };

    use tracing_test::traced_test;

    use super::*;
    use crate::{
        mech::{
            InitParams, StepOut, Unwrapped,
            loopback::{Loopback, LoopbackContext, LoopbackCredential, LoopbackName, MECH_LOOPBACK},
        },
        oid,
        transport::loopback_pair,
    };

    /// Loopback, except that the anonymous name type cannot be rendered
    struct NoAnonymousOid(Loopback);
    impl Mechanism for NoAnonymousOid {
        type Name = LoopbackName;
        type Credential = LoopbackCredential;
        type Context = LoopbackContext;

        fn import_name(&self, name: &[u8], name_type: Option<&Oid>) -> Result<LoopbackName, StatusCodes> {
            self.0.import_name(name, name_type)
        }
        fn display_name(&self, name: &LoopbackName) -> Result<String, StatusCodes> {
            self.0.display_name(name)
        }
        fn oid_to_string(&self, oid: &Oid) -> Result<String, StatusCodes> {
            if *oid == oid::NT_ANONYMOUS {
                return Err(StatusCodes::new("gss_oid_to_str", status::GSS_S_FAILURE, 0));
            }
            self.0.oid_to_string(oid)
        }
        fn display_status(&self, code: u32, status_type: i32) -> Option<String> {
            self.0.display_status(code, status_type)
        }
        fn acquire_cred(&self, name: &LoopbackName, usage: CredentialUsage) -> Result<LoopbackCredential, StatusCodes> {
            self.0.acquire_cred(name, usage)
        }
        fn init_sec_context(
            &self,
            context: &mut Option<LoopbackContext>,
            cred: Option<&LoopbackCredential>,
            target: &LoopbackName,
            params: &InitParams<'_>,
            input: Option<&[u8]>,
        ) -> StepOut<LoopbackName> {
            self.0.init_sec_context(context, cred, target, params, input)
        }
        fn accept_sec_context(
            &self,
            context: &mut Option<LoopbackContext>,
            cred: &LoopbackCredential,
            input: &[u8],
        ) -> StepOut<LoopbackName> {
            self.0.accept_sec_context(context, cred, input)
        }
        fn wrap(&self, context: &mut LoopbackContext, encrypt: bool, message: &[u8]) -> Result<Vec<u8>, StatusCodes> {
            self.0.wrap(context, encrypt, message)
        }
        fn unwrap(&self, context: &mut LoopbackContext, token: &[u8]) -> Result<Unwrapped, StatusCodes> {
            self.0.unwrap(context, token)
        }
        fn get_mic(&self, context: &mut LoopbackContext, message: &[u8]) -> Result<Vec<u8>, StatusCodes> {
            self.0.get_mic(context, message)
        }
        fn verify_mic(&self, context: &mut LoopbackContext, message: &[u8], token: &[u8]) -> Result<(), StatusCodes> {
            self.0.verify_mic(context, message, token)
        }
        fn inquire_names_for_mech(&self, mech: &Oid) -> Result<Vec<Oid>, StatusCodes> {
            self.0.inquire_names_for_mech(mech)
        }
    }

    #[test]
    #[traced_test]
    fn default_reporter_logs_failures() {
        let (transport, _peer) = loopback_pair();
        let mut ctx = Context::new(Loopback::new(b"k"), transport);
        let err = ctx.send_message(b"too early", true).unwrap_err();
        assert_eq!(err.major(), Some(status::GSS_S_NO_CONTEXT));
        assert!(logs_contain("send_message: gss_wrap failed, error: No context has been established"));
    }

    #[test]
    fn custom_reporter_sees_every_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (transport, _peer) = loopback_pair();
        let mut ctx = Context::new(Loopback::new(b"k"), transport).with_reporter(move |failure: &Failure<'_>| {
            sink.lock().unwrap().push((failure.operation, failure.codes.function));
        });
        assert!(ctx.acquire_accept_credential("", NameType::UserName).is_err());
        assert!(ctx.recv_mic(b"x").is_err());
        assert_eq!(
            *seen.lock().unwrap(),
            [("acquire_credential", "gss_import_name"), ("recv_mic", "gss_verify_mic")]
        );
    }

    #[test]
    fn credential_is_replaced() {
        let mech = Loopback::new(b"k");
        let (transport, _peer) = loopback_pair();
        let mut ctx = Context::new(mech.clone(), transport);
        ctx.acquire_accept_credential("a", NameType::HostBasedService).unwrap();
        ctx.acquire_accept_credential("b", NameType::HostBasedService).unwrap();
        assert_eq!(mech.ledger().live_credentials(), 1);
        assert_eq!(mech.ledger().live_names(), 1);
        let service = ctx.service_name().unwrap();
        assert_eq!(mech.display_name(service).unwrap(), "b@localhost");

        assert!(ctx.acquire_accept_credential("", NameType::UserName).is_err());
        assert!(!ctx.has_credential());
        assert_eq!(mech.ledger().live_total(), 0);
    }

    #[test]
    fn unestablished_context_has_no_state() {
        let (transport, _peer) = loopback_pair();
        let ctx = Context::new(Loopback::new(b"k"), transport);
        assert!(!ctx.is_established());
        assert!(!ctx.is_expired());
        assert!(ctx.mech_type().is_none());
        assert!(ctx.support_flags().is_empty());
        assert!(ctx.mech_names().is_empty());
        assert!(ctx.source_name().is_none());
    }

    #[test]
    fn unrenderable_name_types_are_reported_and_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (transport, _peer) = loopback_pair();
        let mut ctx = Context::new(NoAnonymousOid(Loopback::new(b"k")), transport)
            .with_reporter(move |failure: &Failure<'_>| sink.lock().unwrap().push(failure.codes));
        ctx.establish(Some(MECH_LOOPBACK), ContextFlags::INTEGRITY, None);

        let names = ctx.mech_names();
        let all = Loopback::new(b"k").inquire_names_for_mech(&MECH_LOOPBACK).unwrap();
        assert_eq!(names.len(), all.len() - 1);
        assert!(!names.contains(&oid::NT_ANONYMOUS.to_string()));
        assert!(names.contains(&oid::NT_HOSTBASED_SERVICE.to_string()));
        assert_eq!(
            *seen.lock().unwrap(),
            [StatusCodes::new("gss_oid_to_str", status::GSS_S_FAILURE, 0)]
        );
    }

    #[test]
    fn either_role_behind_one_type() {
        let mech = Loopback::new(b"k");
        let (client_transport, server_transport) = loopback_pair();
        let mut acceptor = Context::new(mech.clone(), server_transport);
        acceptor.acquire_accept_credential("svc", NameType::HostBasedService).unwrap();
        let server = Session::from(ServerContext::from_context(acceptor));
        let mut client = Session::from(ClientContext::new(mech.clone(), client_transport));
        assert!(server.is_acceptor());
        assert!(!client.is_acceptor());

        let join_handle = thread::spawn(move || {
            let mut server = server;
            let Session::Acceptor(acceptor) = &mut server else {
                unreachable!()
            };
            acceptor.accept_client().unwrap();
            let message = server.recv_message().unwrap();
            server.send_message(&message.data, true).unwrap();
            server
        });
        let Session::Initiator(initiator) = &mut client else {
            unreachable!()
        };
        initiator
            .init_connect("svc", NameType::HostBasedService, ContextFlags::MUTUAL)
            .unwrap();
        client.send_message(b"ping", true).unwrap();
        let echo = client.recv_message().unwrap();
        assert_eq!(echo.data, b"ping");
        assert!(echo.was_encrypted);

        let Session::Acceptor(server) = join_handle.join().unwrap() else {
            unreachable!()
        };
        let server = server.into_inner();
        assert!(server.is_established());
        assert_eq!(server.support_flags(), client.support_flags());
        let Session::Initiator(client) = client else {
            unreachable!()
        };
        drop(client.into_inner());
        drop(server);
        assert_eq!(mech.ledger().live_total(), 0);
    }
}
