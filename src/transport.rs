//! Moving opaque tokens between the two peers.
//!
//! A context never looks at how tokens travel. It calls [`TokenTransport::send_token`] once per
//! token it produces and [`TokenTransport::recv_token`] whenever it needs the peer's next one.

use std::{
    io::{self, Read, Write},
    sync::mpsc::{Receiver, Sender, channel},
};

use crate::settings::TransportSettings;

pub trait TokenTransport {
    /// Sends exactly one token
    fn send_token(&mut self, token: &[u8]) -> io::Result<()>;
    /// Blocks until exactly one token has arrived
    fn recv_token(&mut self) -> io::Result<Vec<u8>>;
}
impl<T: TokenTransport + ?Sized> TokenTransport for &mut T {
    fn send_token(&mut self, token: &[u8]) -> io::Result<()> {
        (**self).send_token(token)
    }
    fn recv_token(&mut self) -> io::Result<Vec<u8>> {
        (**self).recv_token()
    }
}
impl<T: TokenTransport + ?Sized> TokenTransport for Box<T> {
    fn send_token(&mut self, token: &[u8]) -> io::Result<()> {
        (**self).send_token(token)
    }
    fn recv_token(&mut self) -> io::Result<Vec<u8>> {
        (**self).recv_token()
    }
}

/// Tokens over a byte stream, each prefixed with its length as a big-endian `u32`
#[derive(Debug)]
pub struct FramedTransport<S> {
    stream: S,
    max_token_len: usize,
}
impl<S: Read + Write> FramedTransport<S> {
    pub fn new(stream: S) -> Self {
        Self::with_settings(stream, TransportSettings::default())
    }
    pub fn with_settings(stream: S, settings: TransportSettings) -> Self {
        Self {
            stream,
            max_token_len: settings.max_token_len,
        }
    }
    pub fn get_ref(&self) -> &S {
        &self.stream
    }
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
    pub fn into_inner(self) -> S {
        self.stream
    }
    fn too_long(&self, len: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("token of {len} bytes exceeds the limit of {} bytes", self.max_token_len),
        )
    }
}
impl<S: Read + Write> TokenTransport for FramedTransport<S> {
    fn send_token(&mut self, token: &[u8]) -> io::Result<()> {
        if token.len() > self.max_token_len {
            return Err(self.too_long(token.len()));
        }
        let len = u32::try_from(token.len()).map_err(|_| self.too_long(token.len()))?;
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(token)?;
        self.stream.flush()?;
        tracing::debug!(len = token.len(), "sent token");
        Ok(())
    }
    fn recv_token(&mut self) -> io::Result<Vec<u8>> {
        let mut header = [0; 4];
        self.stream.read_exact(&mut header)?;
        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_token_len {
            return Err(self.too_long(len));
        }
        let mut token = vec![0; len];
        self.stream.read_exact(&mut token)?;
        tracing::debug!(len, "received token");
        Ok(token)
    }
}

/// One end of an in-process token pipe, see [`loopback_pair`]
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}
impl TokenTransport for ChannelTransport {
    fn send_token(&mut self, token: &[u8]) -> io::Result<()> {
        self.tx
            .send(token.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"))?;
        tracing::debug!(len = token.len(), "sent token");
        Ok(())
    }
    fn recv_token(&mut self) -> io::Result<Vec<u8>> {
        let token = self
            .rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "peer hung up"))?;
        tracing::debug!(len = token.len(), "received token");
        Ok(token)
    }
}

/// Two connected ends; what one sends, the other receives. Either end can move to another thread.
pub fn loopback_pair() -> (ChannelTransport, ChannelTransport) {
    let (a_tx, b_rx) = channel();
    let (b_tx, a_rx) = channel();
    (
        ChannelTransport { tx: a_tx, rx: a_rx },
        ChannelTransport { tx: b_tx, rx: b_rx },
    )
}

/// A transport made of two closures
pub struct FnTransport<S, R> {
    send: S,
    recv: R,
}
impl<S, R> FnTransport<S, R>
where
    S: FnMut(&[u8]) -> io::Result<()>,
    R: FnMut() -> io::Result<Vec<u8>>,
{
    pub fn new(send: S, recv: R) -> Self {
        Self { send, recv }
    }
}
impl<S, R> TokenTransport for FnTransport<S, R>
where
    S: FnMut(&[u8]) -> io::Result<()>,
    R: FnMut() -> io::Result<Vec<u8>>,
{
    fn send_token(&mut self, token: &[u8]) -> io::Result<()> {
        (self.send)(token)
    }
    fn recv_token(&mut self) -> io::Result<Vec<u8>> {
        (self.recv)()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn frames_are_length_prefixed() {
        let mut framed = FramedTransport::new(Cursor::new(Vec::new()));
        framed.send_token(b"abc").unwrap();
        framed.send_token(b"").unwrap();
        let written = framed.into_inner().into_inner();
        assert_eq!(written, b"\0\0\0\x03abc\0\0\0\0");

        let mut framed = FramedTransport::new(Cursor::new(written));
        assert_eq!(framed.recv_token().unwrap(), b"abc");
        assert_eq!(framed.recv_token().unwrap(), b"");
        let err = framed.recv_token().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_frames_are_refused() {
        let settings = TransportSettings::default().max_token_len(4);
        let mut framed = FramedTransport::with_settings(Cursor::new(Vec::new()), settings);
        let err = framed.send_token(b"12345").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(framed.get_ref().get_ref().is_empty());

        let incoming = Cursor::new(b"\0\x01\0\0".to_vec());
        let mut framed = FramedTransport::with_settings(incoming, settings);
        assert_eq!(framed.recv_token().unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn loopback_ends_are_crossed() {
        let (mut a, mut b) = loopback_pair();
        a.send_token(b"ping").unwrap();
        assert_eq!(b.recv_token().unwrap(), b"ping");
        b.send_token(b"pong").unwrap();
        assert_eq!(a.recv_token().unwrap(), b"pong");
        drop(b);
        assert_eq!(a.recv_token().unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(a.send_token(b"x").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn closures_carry_tokens() {
        let mut sent = Vec::new();
        let mut queue = vec![b"second".to_vec(), b"first".to_vec()];
        let mut transport = FnTransport::new(
            |t: &[u8]| {
                sent.push(t.to_vec());
                Ok(())
            },
            || queue.pop().ok_or_else(|| io::ErrorKind::UnexpectedEof.into()),
        );
        transport.send_token(b"out").unwrap();
        assert_eq!(transport.recv_token().unwrap(), b"first");
        assert_eq!(transport.recv_token().unwrap(), b"second");
        assert!(transport.recv_token().is_err());
        drop(transport);
        assert_eq!(sent, [b"out".to_vec()]);
    }
}
