use std::ops::{Deref, DerefMut};

use crate::{
    context::Context,
    error::Error,
    flags::ContextFlags,
    mech::{InitParams, Mechanism, StepStatus},
    name::{NameType, import_name},
    settings::InitSettings,
    transport::TokenTransport,
};

/// The initiating end of a security context
pub struct ClientContext<M: Mechanism, T>(Context<M, T>);

impl<M: Mechanism, T> ClientContext<M, T> {
    pub fn new(mech: M, transport: T) -> Self {
        Self(Context::new(mech, transport))
    }
    pub fn from_context(context: Context<M, T>) -> Self {
        Self(context)
    }
    pub fn into_inner(self) -> Context<M, T> {
        self.0
    }
}

impl<M: Mechanism, T: TokenTransport> ClientContext<M, T> {
    /// Negotiates a context with `target`, asking for `flags` and the mechanism's defaults otherwise
    pub fn init_connect(&mut self, target: &str, name_type: NameType, flags: ContextFlags) -> Result<(), Error> {
        self.init_connect_with(target, name_type, &InitSettings::from(flags))
    }

    /// Negotiates a context with `target`, replacing any earlier one.
    ///
    /// Credentials acquired for initiating are used, the mechanism's default identity otherwise.
    pub fn init_connect_with(
        &mut self,
        target: &str,
        name_type: NameType,
        settings: &InitSettings,
    ) -> Result<(), Error> {
        const OPERATION: &str = "init_connect";
        let ctx = &mut self.0;
        let target = import_name(&ctx.mech, target, name_type).map_err(|codes| ctx.report(OPERATION, codes))?;
        ctx.reset();
        let params = InitParams {
            flags: settings.flags,
            lifetime: settings.lifetime,
            mech: settings.mech.as_ref(),
        };
        let mut input: Option<Vec<u8>> = None;
        let mut round = 0_u32;
        loop {
            round += 1;
            let cred = ctx.cred.as_ref().filter(|_| ctx.cred_usage.can_initiate());
            let out = ctx
                .mech
                .init_sec_context(&mut ctx.context, cred, &target, &params, input.as_deref());
            let token = out.token.filter(|t| !t.is_empty());
            match out.status {
                StepStatus::Continue => {
                    tracing::debug!(round, "negotiation continues");
                    if let Some(token) = token {
                        ctx.transport.send_token(&token)?;
                    }
                    input = Some(ctx.transport.recv_token()?);
                }
                StepStatus::Complete => {
                    if let Some(token) = token {
                        ctx.transport.send_token(&token)?;
                    }
                    ctx.peer_name = Some(target);
                    ctx.establish(out.mech, out.flags, out.time_rec);
                    return Ok(());
                }
                StepStatus::Failed(codes) => {
                    if let Some(token) = token {
                        if let Err(err) = ctx.transport.send_token(&token) {
                            tracing::debug!(%err, "could not pass error token to server");
                        }
                    }
                    return Err(ctx.report(OPERATION, codes));
                }
            }
        }
    }
}

impl<M: Mechanism, T> Deref for ClientContext<M, T> {
    type Target = Context<M, T>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<M: Mechanism, T> DerefMut for ClientContext<M, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use std::thread;

    use super::*;
    use crate::{
        cred::CredentialUsage,
        mech::loopback::{Loopback, MECH_LOOPBACK},
        oid,
        server::ServerContext,
        status,
        transport::{ChannelTransport, TokenTransport, loopback_pair},
    };

    #[test]
    fn bad_target_fails_before_sending() {
        let (transport, mut server) = loopback_pair();
        let mut client = ClientContext::new(Loopback::new(b"k"), transport);
        let err = client
            .init_connect("", NameType::UserName, ContextFlags::MUTUAL)
            .unwrap_err();
        assert_eq!(err.major(), Some(status::GSS_S_BAD_NAME));
        client.transport_mut().send_token(b"ping").unwrap();
        assert_eq!(server.recv_token().unwrap(), b"ping");
    }

    fn serve_once(mech: Loopback, transport: ChannelTransport) -> thread::JoinHandle<String> {
        thread::spawn(move || {
            let mut server = ServerContext::new(mech, transport);
            server.acquire_accept_credential("svc", NameType::HostBasedService).unwrap();
            server.accept_client().unwrap();
            let client = server.source_name().unwrap();
            server.mechanism().display_name(client).unwrap()
        })
    }

    #[test]
    fn without_mutual_auth_the_server_still_answers() {
        let mech = Loopback::new(b"k");
        let (transport, server_transport) = loopback_pair();
        let server = serve_once(mech.clone(), server_transport);
        let mut client = ClientContext::new(mech.clone(), transport);
        client.init_connect("svc", NameType::HostBasedService, ContextFlags::REPLAY).unwrap();
        assert!(client.is_established());
        assert_eq!(client.mech_type(), Some(&MECH_LOOPBACK));
        assert!(!client.support_flags().contains(ContextFlags::MUTUAL));
        let target = client.source_name().unwrap();
        assert_eq!(mech.display_name(target).unwrap(), "svc@localhost");
        assert_eq!(server.join().unwrap(), "user@LOOPBACK");
    }

    #[test]
    fn initiator_credentials_name_the_client() {
        let mech = Loopback::new(b"k");
        let (client_transport, server_transport) = loopback_pair();
        let server = serve_once(mech.clone(), server_transport);
        let mut client = ClientContext::new(mech, client_transport);
        client
            .acquire_credential("alice", NameType::UserName, CredentialUsage::Initiate)
            .unwrap();
        client.init_connect("svc", NameType::HostBasedService, ContextFlags::empty()).unwrap();
        assert_eq!(server.join().unwrap(), "alice");
    }

    #[test]
    fn accept_only_credentials_are_not_used_to_initiate() {
        let mech = Loopback::new(b"k");
        let (client_transport, server_transport) = loopback_pair();
        let server = serve_once(mech.clone(), server_transport);
        let mut acceptor = Context::new(mech, client_transport);
        acceptor.acquire_accept_credential("bob", NameType::UserName).unwrap();
        let mut client = ClientContext::from_context(acceptor);
        client.init_connect("svc", NameType::HostBasedService, ContextFlags::MUTUAL).unwrap();
        assert_eq!(server.join().unwrap(), "user@LOOPBACK");
        let context = client.into_inner();
        assert!(context.is_established());
        assert!(context.has_credential());
    }

    #[test]
    fn foreign_mechanism_is_refused() {
        let (transport, _server) = loopback_pair();
        let mut client = ClientContext::new(Loopback::new(b"k"), transport);
        let settings = InitSettings::default().mech(oid::MECH_KRB5);
        let err = client
            .init_connect_with("svc", NameType::HostBasedService, &settings)
            .unwrap_err();
        assert_eq!(err.major(), Some(status::GSS_S_BAD_MECH));
        assert!(!client.is_established());
    }
}
