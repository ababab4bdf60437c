use std::ops::{Deref, DerefMut};

use crate::{
    context::Context,
    error::Error,
    mech::{Mechanism, StepStatus},
    transport::TokenTransport,
};

/// The accepting end of a security context
pub struct ServerContext<M: Mechanism, T>(Context<M, T>);

impl<M: Mechanism, T> ServerContext<M, T> {
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

impl<M: Mechanism, T: TokenTransport> ServerContext<M, T> {
    /// Negotiates a context with the next client, replacing any earlier one.
    ///
    /// Needs credentials from [`Context::acquire_credential`]. Whatever the mechanism answers is
    /// sent back to the client, also when negotiation fails.
    pub fn accept_client(&mut self) -> Result<(), Error> {
        const OPERATION: &str = "accept_client";
        let ctx = &mut self.0;
        if ctx.cred.is_none() {
            return Err(Error::MissingCredential);
        }
        ctx.reset();
        let mut round = 0_u32;
        loop {
            let input = ctx.transport.recv_token()?;
            round += 1;
            let Some(cred) = ctx.cred.as_ref() else {
                return Err(Error::MissingCredential);
            };
            let out = ctx.mech.accept_sec_context(&mut ctx.context, cred, &input);
            let reply = out.token.filter(|t| !t.is_empty());
            match out.status {
                StepStatus::Continue => {
                    tracing::debug!(round, "negotiation continues");
                    if let Some(reply) = reply {
                        ctx.transport.send_token(&reply)?;
                    }
                }
                StepStatus::Complete => {
                    if let Some(reply) = reply {
                        ctx.transport.send_token(&reply)?;
                    }
                    ctx.peer_name = out.source_name;
                    ctx.establish(out.mech, out.flags, out.time_rec);
                    return Ok(());
                }
                StepStatus::Failed(codes) => {
                    if let Some(reply) = reply {
                        if let Err(err) = ctx.transport.send_token(&reply) {
                            tracing::debug!(%err, "could not pass error token to client");
                        }
                    }
                    return Err(ctx.report(OPERATION, codes));
                }
            }
        }
    }
}

impl<M: Mechanism, T> Deref for ServerContext<M, T> {
    type Target = Context<M, T>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<M: Mechanism, T> DerefMut for ServerContext<M, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use super::*;
    use crate::{
        mech::loopback::Loopback,
        name::NameType,
        status,
        transport::{TokenTransport, loopback_pair},
    };

    #[test]
    fn refuses_to_accept_without_credentials() {
        let (transport, _client) = loopback_pair();
        let mut server = ServerContext::new(Loopback::new(b"k"), transport);
        assert!(matches!(server.accept_client(), Err(Error::MissingCredential)));
    }

    #[test]
    fn garbage_is_answered_with_an_error_token() {
        let mech = Loopback::new(b"k");
        let (transport, mut client) = loopback_pair();
        let mut server = ServerContext::new(mech.clone(), transport);
        server.acquire_accept_credential("svc", NameType::HostBasedService).unwrap();
        client.send_token(b"not a token").unwrap();
        let err = server.accept_client().unwrap_err();
        assert_eq!(err.major(), Some(status::GSS_S_DEFECTIVE_TOKEN));
        assert!(!client.recv_token().unwrap().is_empty());
        assert!(!server.is_established());
        drop(server);
        assert_eq!(mech.ledger().live_total(), 0);
    }

    #[test]
    fn hung_up_client_is_a_transport_error() {
        let (transport, client) = loopback_pair();
        let mut server = ServerContext::new(Loopback::new(b"k"), transport);
        server.acquire_accept_credential("svc", NameType::HostBasedService).unwrap();
        drop(client);
        assert!(matches!(server.accept_client(), Err(Error::Transport(_))));
    }
}
