//! A pre-shared-secret mechanism that runs entirely in process.
//!
//! Both peers hold the same secret; the initiator proves knowledge of it in its first token and
//! the acceptor always closes the handshake with a signed reply. The acceptor alone decides how
//! many challenge/response rounds come in between, so peers configured differently still agree.
//! Wrap tokens are AES-256-GCM under per-direction keys with the sequence number as nonce. MICs and
//! handshake proofs are HMAC-SHA256.
//!
//! Nothing here is meant to protect real traffic. It exists so contexts can be negotiated without
//! a KDC, and it counts every handle it gives out (see [`Ledger`]).

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    cred::CredentialUsage,
    error::StatusCodes,
    flags::ContextFlags,
    mech::{InitParams, Mechanism, StepOut, StepStatus, Unwrapped},
    name::NameType,
    oid::{self, Oid},
    status,
};

mod ledger;
mod token;

pub use ledger::{Ledger, Resource};
use ledger::Tracked;
use token::{Kind, MAC_LEN, NONCE_LEN, Reader, TAG_LEN, Writer};

/// 1.3.6.1.3.3.1, from the experimental arc
pub const MECH_LOOPBACK: Oid = Oid::from_static(&[0x2b, 0x06, 0x01, 0x03, 0x03, 0x01]);

const ANONYMOUS_PRINCIPAL: &str = "WELLKNOWN/ANONYMOUS@WELLKNOWN:ANONYMOUS";
const DEFAULT_HOST: &str = "localhost";

/// Flags the mechanism can grant when asked
const NEGOTIABLE: ContextFlags = ContextFlags::MUTUAL
    .union(ContextFlags::REPLAY)
    .union(ContextFlags::SEQUENCE)
    .union(ContextFlags::ANONYMOUS);
/// Flags granted on every context. Protection needs an established context, so no
/// `PROTECTION_READY`.
const ALWAYS: ContextFlags = ContextFlags::CONFIDENTIAL.union(ContextFlags::INTEGRITY);

/// Minor status codes of the loopback mechanism
pub mod minor {
    pub const BAD_INTEGRITY: u32 = 0x4c42_0001;
    pub const WRONG_PRINCIPAL: u32 = 0x4c42_0002;
    pub const MALFORMED_TOKEN: u32 = 0x4c42_0003;
    pub const UNEXPECTED_TOKEN: u32 = 0x4c42_0004;
    pub const NO_KEY: u32 = 0x4c42_0005;
    pub const WRONG_USAGE: u32 = 0x4c42_0006;
    pub const UNSUPPORTED_MECH: u32 = 0x4c42_0007;
    pub const RANDOM_FAILED: u32 = 0x4c42_0008;
    pub const BAD_NAME_SYNTAX: u32 = 0x4c42_0009;
    pub const WRONG_MECH: u32 = 0x4c42_000a;
    pub const REJECTED_BY_PEER: u32 = 0x4c42_000b;

    pub(super) fn describe(code: u32) -> Option<&'static str> {
        Some(match code {
            0 => "Success",
            BAD_INTEGRITY => "Integrity check on a handshake token failed",
            WRONG_PRINCIPAL => "Token was issued for a different service principal",
            MALFORMED_TOKEN => "Token is malformed",
            UNEXPECTED_TOKEN => "Token arrived out of order",
            NO_KEY => "No key available for the requested principal",
            WRONG_USAGE => "Credentials cannot be used for this operation",
            UNSUPPORTED_MECH => "Requested mechanism is not the loopback mechanism",
            RANDOM_FAILED => "Random number source failed",
            BAD_NAME_SYNTAX => "Name does not match the syntax of its name type",
            WRONG_MECH => "Exported name belongs to another mechanism",
            REJECTED_BY_PEER => "Peer rejected the handshake",
            _ => return None,
        })
    }
}

#[derive(Clone, Debug)]
struct Config {
    secret: Box<[u8]>,
    principals: Option<Vec<String>>,
    default_principal: String,
    extra_rounds: u16,
    max_lifetime: Option<Duration>,
}

/// The loopback mechanism. Clones share configuration and ledger.
#[derive(Clone, Debug)]
pub struct Loopback {
    config: Arc<Config>,
    ledger: Arc<Ledger>,
}
impl Loopback {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            config: Arc::new(Config {
                secret: secret.into(),
                principals: None,
                default_principal: "user@LOOPBACK".to_owned(),
                extra_rounds: 0,
                max_lifetime: Some(Duration::from_secs(10 * 60 * 60)),
            }),
            ledger: Arc::default(),
        }
    }
    /// Only these principals can acquire credentials (by default everyone can)
    #[must_use]
    pub fn with_principals<I, S>(mut self, principals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.config).principals = Some(principals.into_iter().map(Into::into).collect());
        self
    }
    /// Identity of initiators that did not acquire credentials
    #[must_use]
    pub fn with_default_principal(mut self, principal: &str) -> Self {
        principal.clone_into(&mut Arc::make_mut(&mut self.config).default_principal);
        self
    }
    /// Challenge/response rounds between the initiator's first token and completion.
    ///
    /// Only the accepting side's setting counts; initiators follow whatever the acceptor sends.
    #[must_use]
    pub fn with_extra_rounds(mut self, rounds: u16) -> Self {
        Arc::make_mut(&mut self.config).extra_rounds = rounds;
        self
    }
    /// Upper bound for context lifetimes, `None` for indefinite contexts
    #[must_use]
    pub fn with_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        Arc::make_mut(&mut self.config).max_lifetime = lifetime;
        self
    }
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn grant_flags(&self, requested: ContextFlags) -> ContextFlags {
        (requested & NEGOTIABLE) | ALWAYS
    }
    fn grant_lifetime(&self, requested: u32) -> Option<Duration> {
        let requested = match requested {
            0 | status::GSS_C_INDEFINITE => None,
            secs => Some(Duration::from_secs(secs.into())),
        };
        match (requested, self.config.max_lifetime) {
            (Some(r), Some(max)) => Some(r.min(max)),
            (Some(r), None) => Some(r),
            (None, max) => max,
        }
    }
    fn session_key(&self, transcript: &[u8; MAC_LEN]) -> [u8; MAC_LEN] {
        mac(&self.config.secret, &[b"session", transcript])
    }
    fn new_context(
        &self,
        role: Role,
        transcript: [u8; MAC_LEN],
        flags: ContextFlags,
        lifetime: Option<Duration>,
    ) -> LoopbackContext {
        LoopbackContext {
            role,
            phase: Phase::Negotiating { next_round: 1 },
            session_key: self.session_key(&transcript),
            transcript,
            flags,
            time_rec: lifetime,
            expires: None,
            send_seq: 0,
            recv_seq: 0,
            _tracked: Tracked::new(&self.ledger, Resource::Context),
        }
    }
    fn new_name(&self, kind: NameType, display: String) -> LoopbackName {
        LoopbackName {
            kind,
            display,
            _tracked: Tracked::new(&self.ledger, Resource::Name),
        }
    }
    fn parse_exported(&self, token: &[u8]) -> Option<Result<String, u32>> {
        // 04 01 | oid length (u16) | 06 len oid | name length (u32) | name
        let (header, rest) = token.split_at_checked(4)?;
        if header[..2] != [0x04, 0x01] {
            return None;
        }
        let oid_len = usize::from(u16::from_be_bytes([header[2], header[3]]));
        let (wrapped_oid, rest) = rest.split_at_checked(oid_len)?;
        let [0x06, len, mech @ ..] = wrapped_oid else {
            return None;
        };
        if usize::from(*len) != mech.len() {
            return None;
        }
        if mech != MECH_LOOPBACK.as_bytes() {
            return Some(Err(minor::WRONG_MECH));
        }
        let (name_len, name) = rest.split_at_checked(4)?;
        let name_len = u32::from_be_bytes(name_len.try_into().ok()?);
        if usize::try_from(name_len).ok()? != name.len() {
            return None;
        }
        std::str::from_utf8(name).ok().map(|s| Ok(s.to_owned()))
    }
}

impl Mechanism for Loopback {
    type Name = LoopbackName;
    type Credential = LoopbackCredential;
    type Context = LoopbackContext;

    fn import_name(&self, name: &[u8], name_type: Option<&Oid>) -> Result<LoopbackName, StatusCodes> {
        const FUNCTION: &str = "gss_import_name";
        let bad_name = |minor| StatusCodes::new(FUNCTION, status::GSS_S_BAD_NAME, minor);
        let Some(kind) = NameType::from_oid(name_type) else {
            return Err(StatusCodes::new(FUNCTION, status::GSS_S_BAD_NAMETYPE, 0));
        };
        if kind == NameType::ExportName {
            return match self.parse_exported(name) {
                Some(Ok(display)) if !display.is_empty() => Ok(self.new_name(NameType::UserName, display)),
                Some(Err(minor)) => Err(bad_name(minor)),
                _ => Err(bad_name(minor::MALFORMED_TOKEN)),
            };
        }
        let Ok(text) = std::str::from_utf8(name) else {
            return Err(bad_name(minor::BAD_NAME_SYNTAX));
        };
        let display = match kind {
            NameType::Anonymous => ANONYMOUS_PRINCIPAL.to_owned(),
            _ if text.is_empty() => return Err(bad_name(minor::BAD_NAME_SYNTAX)),
            NameType::HostBasedService => match text.split_once('@') {
                None => format!("{text}@{DEFAULT_HOST}"),
                Some((service, host)) if !service.is_empty() && !host.is_empty() => text.to_owned(),
                Some(_) => return Err(bad_name(minor::BAD_NAME_SYNTAX)),
            },
            NameType::MachineUid | NameType::StringUid => match text.parse::<u32>() {
                Ok(uid) => uid.to_string(),
                Err(_) => return Err(bad_name(minor::BAD_NAME_SYNTAX)),
            },
            _ => text.to_owned(),
        };
        let kind = match kind {
            NameType::NoName | NameType::NoOid => NameType::UserName,
            other => other,
        };
        Ok(self.new_name(kind, display))
    }

    fn display_name(&self, name: &LoopbackName) -> Result<String, StatusCodes> {
        Ok(name.display.clone())
    }

    fn oid_to_string(&self, oid: &Oid) -> Result<String, StatusCodes> {
        oid.arcs()
            .map(|_| oid.to_string())
            .ok_or(StatusCodes::new("gss_oid_to_str", status::GSS_S_CALL_BAD_STRUCTURE, 0))
    }

    fn display_status(&self, code: u32, status_type: i32) -> Option<String> {
        match status_type {
            status::GSS_C_GSS_CODE => Some(status::major_description(code)),
            status::GSS_C_MECH_CODE => minor::describe(code).map(str::to_owned),
            _ => None,
        }
    }

    fn acquire_cred(&self, name: &LoopbackName, usage: CredentialUsage) -> Result<LoopbackCredential, StatusCodes> {
        if let Some(principals) = &self.config.principals {
            if !principals.iter().any(|p| *p == name.display) {
                return Err(StatusCodes::new("gss_acquire_cred", status::GSS_S_NO_CRED, minor::NO_KEY));
            }
        }
        Ok(LoopbackCredential {
            principal: name.display.clone(),
            usage,
            _tracked: Tracked::new(&self.ledger, Resource::Credential),
        })
    }

    fn init_sec_context(
        &self,
        context: &mut Option<LoopbackContext>,
        cred: Option<&LoopbackCredential>,
        target: &LoopbackName,
        params: &InitParams<'_>,
        input: Option<&[u8]>,
    ) -> StepOut<LoopbackName> {
        const FUNCTION: &str = "gss_init_sec_context";
        let fail = |major, minor| StepOut::failed(StatusCodes::new(FUNCTION, major, minor));
        if params.mech.is_some_and(|m| *m != MECH_LOOPBACK) {
            return fail(status::GSS_S_BAD_MECH, minor::UNSUPPORTED_MECH);
        }
        let Some(ctx) = context.as_mut() else {
            if input.is_some_and(|i| !i.is_empty()) {
                return fail(status::GSS_S_DEFECTIVE_TOKEN, minor::UNEXPECTED_TOKEN);
            }
            let initiator = match cred {
                Some(c) if !c.usage.can_initiate() => return fail(status::GSS_S_NO_CRED, minor::WRONG_USAGE),
                _ if params.flags.contains(ContextFlags::ANONYMOUS) => ANONYMOUS_PRINCIPAL,
                Some(c) => c.principal.as_str(),
                None => self.config.default_principal.as_str(),
            };
            let mut nonce = [0; NONCE_LEN];
            if getrandom::fill(&mut nonce).is_err() {
                return fail(status::GSS_S_FAILURE, minor::RANDOM_FAILED);
            }
            let lifetime = params
                .lifetime
                .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(status::GSS_C_INDEFINITE));
            let body = Writer::new(Kind::Init)
                .u32(params.flags.bits())
                .u32(lifetime)
                .bytes(&nonce)
                .str16(&target.display)
                .str16(initiator);
            let transcript = mac(&self.config.secret, &[body.as_slice()]);
            let token = body.bytes(&transcript).finish();

            let flags = self.grant_flags(params.flags);
            let ctx = self.new_context(Role::Initiator, transcript, flags, self.grant_lifetime(lifetime));
            // The acceptor always answers, with a challenge or with its reply
            let out = ctx.step_out(StepStatus::Continue, None);
            *context = Some(ctx);
            return out.with_token(token);
        };

        let Phase::Negotiating { next_round } = ctx.phase else {
            return fail(status::GSS_S_FAILURE, minor::UNEXPECTED_TOKEN);
        };
        let Some((kind, mut reader)) = input.and_then(Reader::open) else {
            ctx.phase = Phase::Failed;
            return fail(status::GSS_S_DEFECTIVE_TOKEN, minor::MALFORMED_TOKEN);
        };
        match kind {
            Kind::Error => {
                ctx.phase = Phase::Failed;
                match (reader.u32(), reader.u32()) {
                    (Some(major), Some(minor)) if status::is_error(major) => fail(major, minor),
                    _ => fail(status::GSS_S_FAILURE, minor::REJECTED_BY_PEER),
                }
            }
            Kind::Challenge => {
                let parsed = (|| {
                    let round = reader.u16()?;
                    let total = reader.u16()?;
                    let nonce: [u8; NONCE_LEN] = reader.array()?;
                    let signed = reader.consumed();
                    let tag: [u8; MAC_LEN] = reader.array()?;
                    reader.finish()?;
                    Some((round, total, nonce, verify(&ctx.session_key, &[signed], &tag)))
                })();
                let Some((round, total, nonce, authentic)) = parsed else {
                    ctx.phase = Phase::Failed;
                    return fail(status::GSS_S_DEFECTIVE_TOKEN, minor::MALFORMED_TOKEN);
                };
                if !authentic {
                    ctx.phase = Phase::Failed;
                    return fail(status::GSS_S_DEFECTIVE_TOKEN, minor::BAD_INTEGRITY);
                }
                if round != next_round || round > total {
                    ctx.phase = Phase::Failed;
                    return fail(status::GSS_S_DEFECTIVE_TOKEN, minor::UNEXPECTED_TOKEN);
                }
                let proof = mac(&ctx.session_key, &[b"response", &round.to_be_bytes(), &nonce]);
                let token = Writer::new(Kind::Response).u16(round).bytes(&proof).finish();
                ctx.phase = Phase::Negotiating { next_round: round + 1 };
                ctx.step_out(StepStatus::Continue, None).with_token(token)
            }
            Kind::Reply => {
                let parsed = (|| {
                    let flags = reader.u32()?;
                    let lifetime = reader.u32()?;
                    let signed = reader.consumed();
                    let tag: [u8; MAC_LEN] = reader.array()?;
                    reader.finish()?;
                    let authentic = verify(&ctx.session_key, &[b"reply", &ctx.transcript, signed], &tag);
                    Some((flags, lifetime, authentic))
                })();
                let Some((flags, lifetime, authentic)) = parsed else {
                    ctx.phase = Phase::Failed;
                    return fail(status::GSS_S_DEFECTIVE_TOKEN, minor::MALFORMED_TOKEN);
                };
                if !authentic {
                    ctx.phase = Phase::Failed;
                    return fail(status::GSS_S_DEFECTIVE_TOKEN, minor::BAD_INTEGRITY);
                }
                ctx.flags = ContextFlags::from_bits_truncate(flags);
                ctx.time_rec = decode_lifetime(lifetime);
                ctx.establish();
                ctx.step_out(StepStatus::Complete, None)
            }
            Kind::Init | Kind::Response | Kind::Wrap | Kind::Mic => {
                ctx.phase = Phase::Failed;
                fail(status::GSS_S_DEFECTIVE_TOKEN, minor::UNEXPECTED_TOKEN)
            }
        }
    }

    fn accept_sec_context(
        &self,
        context: &mut Option<LoopbackContext>,
        cred: &LoopbackCredential,
        input: &[u8],
    ) -> StepOut<LoopbackName> {
        const FUNCTION: &str = "gss_accept_sec_context";
        let reject = |major, minor| {
            let codes = StatusCodes::new(FUNCTION, major, minor);
            StepOut::failed(codes).with_token(error_token(codes))
        };
        if !cred.usage.can_accept() {
            return reject(status::GSS_S_NO_CRED, minor::WRONG_USAGE);
        }
        let Some((kind, mut reader)) = Reader::open(input) else {
            if let Some(ctx) = context.as_mut() {
                ctx.phase = Phase::Failed;
            }
            return reject(status::GSS_S_DEFECTIVE_TOKEN, minor::MALFORMED_TOKEN);
        };

        let Some(ctx) = context.as_mut() else {
            if kind != Kind::Init {
                return reject(status::GSS_S_DEFECTIVE_TOKEN, minor::UNEXPECTED_TOKEN);
            }
            let parsed = (|| {
                let flags = reader.u32()?;
                let lifetime = reader.u32()?;
                let _nonce: [u8; NONCE_LEN] = reader.array()?;
                let target = reader.str16()?;
                let initiator = reader.str16()?;
                let signed = reader.consumed();
                let tag: [u8; MAC_LEN] = reader.array()?;
                reader.finish()?;
                Some((flags, lifetime, target, initiator, signed, tag))
            })();
            let Some((flags, lifetime, target, initiator, signed, tag)) = parsed else {
                return reject(status::GSS_S_DEFECTIVE_TOKEN, minor::MALFORMED_TOKEN);
            };
            if !verify(&self.config.secret, &[signed], &tag) {
                return reject(status::GSS_S_DEFECTIVE_TOKEN, minor::BAD_INTEGRITY);
            }
            if target != cred.principal {
                return reject(status::GSS_S_FAILURE, minor::WRONG_PRINCIPAL);
            }
            let requested = ContextFlags::from_bits_truncate(flags);
            let mut ctx = self.new_context(
                Role::Acceptor,
                tag,
                self.grant_flags(requested),
                self.grant_lifetime(lifetime),
            );
            let out = match self.config.extra_rounds {
                0 => self.finish_accept(&mut ctx, initiator),
                total => match ctx.challenge(1, total, initiator) {
                    Ok(token) => ctx.step_out(StepStatus::Continue, None).with_token(token),
                    Err(()) => {
                        ctx.phase = Phase::Failed;
                        reject(status::GSS_S_FAILURE, minor::RANDOM_FAILED)
                    }
                },
            };
            *context = Some(ctx);
            return out;
        };

        let Phase::AwaitingResponse { round, nonce, ref initiator } = ctx.phase else {
            ctx.phase = Phase::Failed;
            return reject(status::GSS_S_FAILURE, minor::UNEXPECTED_TOKEN);
        };
        let initiator = initiator.clone();
        if kind != Kind::Response {
            ctx.phase = Phase::Failed;
            return reject(status::GSS_S_DEFECTIVE_TOKEN, minor::UNEXPECTED_TOKEN);
        }
        let parsed = (|| {
            let answered = reader.u16()?;
            let proof: [u8; MAC_LEN] = reader.array()?;
            reader.finish()?;
            Some((answered, proof))
        })();
        let Some((answered, proof)) = parsed else {
            ctx.phase = Phase::Failed;
            return reject(status::GSS_S_DEFECTIVE_TOKEN, minor::MALFORMED_TOKEN);
        };
        if answered != round || !verify(&ctx.session_key, &[b"response", &round.to_be_bytes(), &nonce], &proof) {
            ctx.phase = Phase::Failed;
            return reject(status::GSS_S_DEFECTIVE_TOKEN, minor::BAD_INTEGRITY);
        }
        if round < self.config.extra_rounds {
            match ctx.challenge(round + 1, self.config.extra_rounds, initiator) {
                Ok(token) => ctx.step_out(StepStatus::Continue, None).with_token(token),
                Err(()) => {
                    ctx.phase = Phase::Failed;
                    reject(status::GSS_S_FAILURE, minor::RANDOM_FAILED)
                }
            }
        } else {
            self.finish_accept(ctx, initiator)
        }
    }

    fn wrap(&self, context: &mut LoopbackContext, encrypt: bool, message: &[u8]) -> Result<Vec<u8>, StatusCodes> {
        const FUNCTION: &str = "gss_wrap";
        context.usable(FUNCTION)?;
        let Ok(len) = u32::try_from(message.len()) else {
            return Err(StatusCodes::new(FUNCTION, status::GSS_S_FAILURE, minor::MALFORMED_TOKEN));
        };
        let seal = encrypt && context.flags.contains(ContextFlags::CONFIDENTIAL);
        let seq = context.next_send_seq();
        let cipher = context.sending_cipher();
        let nonce = seq_nonce(seq);
        let header = Writer::new(Kind::Wrap).u8(u8::from(seal)).u64(seq);
        // Sealed tokens carry the ciphertext; otherwise the plaintext goes in the associated data
        let (body, payload) = if seal {
            (header, message)
        } else {
            (header.u32(len).bytes(message), &[][..])
        };
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: payload,
                    aad: body.as_slice(),
                },
            )
            .map_err(|_| StatusCodes::new(FUNCTION, status::GSS_S_FAILURE, 0))?;
        Ok(body.bytes(&sealed).finish())
    }

    fn unwrap(&self, context: &mut LoopbackContext, token: &[u8]) -> Result<Unwrapped, StatusCodes> {
        const FUNCTION: &str = "gss_unwrap";
        context.usable(FUNCTION)?;
        let defective = StatusCodes::new(FUNCTION, status::GSS_S_DEFECTIVE_TOKEN, minor::MALFORMED_TOKEN);
        let (seq, aad, sealed, plaintext) = (|| {
            let (kind, mut reader) = Reader::open(token)?;
            if kind != Kind::Wrap {
                return None;
            }
            let seal = reader.u8()?;
            let seq = reader.u64()?;
            match seal {
                1 => {
                    let header = reader.consumed();
                    let sealed = reader.rest();
                    (sealed.len() >= TAG_LEN).then_some((seq, header, sealed, None))
                }
                0 => {
                    let len = reader.u32()?;
                    let plaintext = reader.bytes(usize::try_from(len).ok()?)?;
                    let signed = reader.consumed();
                    let tag = reader.bytes(TAG_LEN)?;
                    reader.finish()?;
                    Some((seq, signed, tag, Some(plaintext)))
                }
                _ => None,
            }
        })()
        .ok_or(defective)?;
        let opened = context
            .receiving_cipher()
            .decrypt(Nonce::from_slice(&seq_nonce(seq)), Payload { msg: sealed, aad })
            .map_err(|_| StatusCodes::new(FUNCTION, status::GSS_S_BAD_SIG, 0))?;
        context.accept_seq(FUNCTION, seq)?;
        Ok(match plaintext {
            Some(plaintext) => Unwrapped {
                data: plaintext.to_vec(),
                encrypted: false,
            },
            None => Unwrapped {
                data: opened,
                encrypted: true,
            },
        })
    }

    fn get_mic(&self, context: &mut LoopbackContext, message: &[u8]) -> Result<Vec<u8>, StatusCodes> {
        context.usable("gss_get_mic")?;
        let seq = context.next_send_seq();
        let tag = mac(&context.sending_key(), &[b"mic", &seq.to_be_bytes(), message]);
        Ok(Writer::new(Kind::Mic).u64(seq).bytes(&tag).finish())
    }

    fn verify_mic(&self, context: &mut LoopbackContext, message: &[u8], token: &[u8]) -> Result<(), StatusCodes> {
        const FUNCTION: &str = "gss_verify_mic";
        context.usable(FUNCTION)?;
        let parsed = (|| {
            let (kind, mut reader) = Reader::open(token)?;
            if kind != Kind::Mic {
                return None;
            }
            let seq = reader.u64()?;
            let tag: [u8; MAC_LEN] = reader.array()?;
            reader.finish()?;
            Some((seq, tag))
        })();
        let Some((seq, tag)) = parsed else {
            return Err(StatusCodes::new(FUNCTION, status::GSS_S_DEFECTIVE_TOKEN, minor::MALFORMED_TOKEN));
        };
        if !verify(&context.receiving_key(), &[b"mic", &seq.to_be_bytes(), message], &tag) {
            return Err(StatusCodes::new(FUNCTION, status::GSS_S_BAD_SIG, 0));
        }
        context.accept_seq(FUNCTION, seq)
    }

    fn inquire_names_for_mech(&self, mech: &Oid) -> Result<Vec<Oid>, StatusCodes> {
        if *mech != MECH_LOOPBACK {
            return Err(StatusCodes::new(
                "gss_inquire_names_for_mech",
                status::GSS_S_BAD_MECH,
                minor::UNSUPPORTED_MECH,
            ));
        }
        Ok(vec![
            oid::NT_USER_NAME,
            oid::NT_HOSTBASED_SERVICE,
            oid::NT_MACHINE_UID_NAME,
            oid::NT_STRING_UID_NAME,
            oid::NT_ANONYMOUS,
            oid::NT_EXPORT_NAME,
        ])
    }
}

impl Loopback {
    fn finish_accept(&self, ctx: &mut LoopbackContext, initiator: String) -> StepOut<LoopbackName> {
        ctx.establish();
        let kind = if ctx.flags.contains(ContextFlags::ANONYMOUS) {
            NameType::Anonymous
        } else {
            NameType::UserName
        };
        let source = self.new_name(kind, initiator);
        // Sent with or without mutual auth: it tells the initiator the handshake is over
        let body = Writer::new(Kind::Reply)
            .u32(ctx.flags.bits())
            .u32(ctx.time_rec.map_or(status::GSS_C_INDEFINITE, |d| {
                u32::try_from(d.as_secs()).unwrap_or(status::GSS_C_INDEFINITE)
            }));
        let tag = mac(&ctx.session_key, &[b"reply", &ctx.transcript, body.as_slice()]);
        ctx.step_out(StepStatus::Complete, Some(source))
            .with_token(body.bytes(&tag).finish())
    }
}

pub struct LoopbackName {
    kind: NameType,
    display: String,
    _tracked: Tracked,
}
impl LoopbackName {
    pub fn name_type(&self) -> NameType {
        self.kind
    }
}
impl std::fmt::Debug for LoopbackName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LoopbackName").field(&self.display).finish()
    }
}

#[derive(Debug)]
pub struct LoopbackCredential {
    principal: String,
    usage: CredentialUsage,
    _tracked: Tracked,
}
impl LoopbackCredential {
    pub fn usage(&self) -> CredentialUsage {
        self.usage
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Initiator,
    Acceptor,
}

#[derive(Debug)]
enum Phase {
    Negotiating { next_round: u16 },
    AwaitingResponse { round: u16, nonce: [u8; NONCE_LEN], initiator: String },
    Established,
    Failed,
}

#[derive(Debug)]
pub struct LoopbackContext {
    role: Role,
    phase: Phase,
    session_key: [u8; MAC_LEN],
    /// HMAC of the initiator's first token, binds everything after it to that token
    transcript: [u8; MAC_LEN],
    flags: ContextFlags,
    time_rec: Option<Duration>,
    expires: Option<Instant>,
    send_seq: u64,
    recv_seq: u64,
    _tracked: Tracked,
}
impl LoopbackContext {
    pub fn is_established(&self) -> bool {
        matches!(self.phase, Phase::Established)
    }
    fn establish(&mut self) {
        self.phase = Phase::Established;
        self.expires = self.time_rec.map(|d| Instant::now() + d);
    }
    fn step_out(&self, status: StepStatus, source_name: Option<LoopbackName>) -> StepOut<LoopbackName> {
        let established = self.is_established();
        StepOut {
            status,
            token: None,
            mech: Some(MECH_LOOPBACK),
            flags: if established { self.flags } else { ContextFlags::empty() },
            time_rec: self.time_rec,
            source_name,
        }
    }
    fn challenge(&mut self, round: u16, total: u16, initiator: String) -> Result<Vec<u8>, ()> {
        let mut nonce = [0; NONCE_LEN];
        getrandom::fill(&mut nonce).map_err(|_| ())?;
        let body = Writer::new(Kind::Challenge).u16(round).u16(total).bytes(&nonce);
        let tag = mac(&self.session_key, &[body.as_slice()]);
        self.phase = Phase::AwaitingResponse { round, nonce, initiator };
        Ok(body.bytes(&tag).finish())
    }
    fn usable(&self, function: &'static str) -> Result<(), StatusCodes> {
        if !self.is_established() {
            return Err(StatusCodes::new(function, status::GSS_S_NO_CONTEXT, 0));
        }
        if self.expires.is_some_and(|e| Instant::now() >= e) {
            return Err(StatusCodes::new(function, status::GSS_S_CONTEXT_EXPIRED, 0));
        }
        Ok(())
    }
    fn direction_key(&self, role: Role, usage: &[u8]) -> [u8; MAC_LEN] {
        let label: &[u8] = match role {
            Role::Initiator => b"initiator",
            Role::Acceptor => b"acceptor",
        };
        mac(&self.session_key, &[label, usage])
    }
    fn peer_role(&self) -> Role {
        match self.role {
            Role::Initiator => Role::Acceptor,
            Role::Acceptor => Role::Initiator,
        }
    }
    fn sending_key(&self) -> [u8; MAC_LEN] {
        self.direction_key(self.role, b"mic")
    }
    fn receiving_key(&self) -> [u8; MAC_LEN] {
        self.direction_key(self.peer_role(), b"mic")
    }
    fn sending_cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.direction_key(self.role, b"seal").into())
    }
    fn receiving_cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.direction_key(self.peer_role(), b"seal").into())
    }
    fn next_send_seq(&mut self) -> u64 {
        let seq = self.send_seq;
        self.send_seq += 1;
        seq
    }
    fn accept_seq(&mut self, function: &'static str, seq: u64) -> Result<(), StatusCodes> {
        if seq < self.recv_seq {
            if self.flags.contains(ContextFlags::REPLAY) {
                return Err(StatusCodes::new(function, status::GSS_S_DUPLICATE_TOKEN, 0));
            }
            if self.flags.contains(ContextFlags::SEQUENCE) {
                return Err(StatusCodes::new(function, status::GSS_S_UNSEQ_TOKEN, 0));
            }
            return Ok(());
        }
        self.recv_seq = seq + 1;
        Ok(())
    }
}

fn decode_lifetime(secs: u32) -> Option<Duration> {
    (secs != status::GSS_C_INDEFINITE).then(|| Duration::from_secs(secs.into()))
}

fn error_token(codes: StatusCodes) -> Vec<u8> {
    Writer::new(Kind::Error).u32(codes.major).u32(codes.minor).finish()
}

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &[u8], parts: &[&[u8]]) -> [u8; MAC_LEN] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

fn verify(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(tag).is_ok()
}

/// Keys differ per direction, so the sequence number alone keeps nonces unique
fn seq_nonce(seq: u64) -> [u8; 12] {
    let mut nonce = [0; 12];
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}
