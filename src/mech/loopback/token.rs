//! Wire format of the loopback mechanism.
//!
//! Every token starts with `"LB"` and a kind byte. Integers are big-endian, strings carry a `u16`
//! length. Handshake tokens end in a 32 byte HMAC over everything before it, wrap tokens in a
//! 16 byte AES-GCM tag.

pub(super) const MAGIC: [u8; 2] = *b"LB";
pub(super) const NONCE_LEN: usize = 16;
pub(super) const MAC_LEN: usize = 32;
pub(super) const TAG_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Kind {
    Init,
    Reply,
    Challenge,
    Response,
    Wrap,
    Mic,
    Error,
}
impl Kind {
    fn to_byte(self) -> u8 {
        match self {
            Self::Init => 1,
            Self::Reply => 2,
            Self::Challenge => 3,
            Self::Response => 4,
            Self::Wrap => 5,
            Self::Mic => 6,
            Self::Error => 0x7f,
        }
    }
    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Init,
            2 => Self::Reply,
            3 => Self::Challenge,
            4 => Self::Response,
            5 => Self::Wrap,
            6 => Self::Mic,
            0x7f => Self::Error,
            _ => return None,
        })
    }
}

pub(super) struct Writer(Vec<u8>);
impl Writer {
    pub(super) fn new(kind: Kind) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&MAGIC);
        buf.push(kind.to_byte());
        Self(buf)
    }
    pub(super) fn u8(mut self, val: u8) -> Self {
        self.0.push(val);
        self
    }
    pub(super) fn u16(mut self, val: u16) -> Self {
        self.0.extend_from_slice(&val.to_be_bytes());
        self
    }
    pub(super) fn u32(mut self, val: u32) -> Self {
        self.0.extend_from_slice(&val.to_be_bytes());
        self
    }
    pub(super) fn u64(mut self, val: u64) -> Self {
        self.0.extend_from_slice(&val.to_be_bytes());
        self
    }
    pub(super) fn bytes(mut self, val: &[u8]) -> Self {
        self.0.extend_from_slice(val);
        self
    }
    /// Strings longer than `u16::MAX` bytes are cut
    pub(super) fn str16(self, val: &str) -> Self {
        let bytes = &val.as_bytes()[..val.len().min(usize::from(u16::MAX))];
        self.u16(bytes.len() as u16).bytes(bytes)
    }
    pub(super) fn as_slice(&self) -> &[u8] {
        &self.0
    }
    pub(super) fn finish(self) -> Vec<u8> {
        self.0
    }
}

pub(super) struct Reader<'a> {
    token: &'a [u8],
    pos: usize,
}
impl<'a> Reader<'a> {
    pub(super) fn open(token: &'a [u8]) -> Option<(Kind, Self)> {
        let (head, _) = token.split_at_checked(MAGIC.len() + 1)?;
        if head[..MAGIC.len()] != MAGIC {
            return None;
        }
        let kind = Kind::from_byte(head[MAGIC.len()])?;
        Some((
            kind,
            Self {
                token,
                pos: MAGIC.len() + 1,
            },
        ))
    }
    pub(super) fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.token.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }
    pub(super) fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.bytes(N)?.try_into().ok()
    }
    pub(super) fn u8(&mut self) -> Option<u8> {
        self.array::<1>().map(|[b]| b)
    }
    pub(super) fn u16(&mut self) -> Option<u16> {
        self.array().map(u16::from_be_bytes)
    }
    pub(super) fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_be_bytes)
    }
    pub(super) fn u64(&mut self) -> Option<u64> {
        self.array().map(u64::from_be_bytes)
    }
    pub(super) fn str16(&mut self) -> Option<String> {
        let len = self.u16()?;
        let bytes = self.bytes(usize::from(len))?;
        String::from_utf8(bytes.to_vec()).ok()
    }
    /// Everything not read yet
    pub(super) fn rest(&mut self) -> &'a [u8] {
        let rest = &self.token[self.pos..];
        self.pos = self.token.len();
        rest
    }
    /// Everything read so far, header included
    pub(super) fn consumed(&self) -> &'a [u8] {
        &self.token[..self.pos]
    }
    /// Fails if bytes are left over
    pub(super) fn finish(self) -> Option<()> {
        (self.pos == self.token.len()).then_some(())
    }
}
