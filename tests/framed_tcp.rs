use std::{
    io::Write,
    net::{TcpListener, TcpStream},
    thread,
};

use gsslayer::{
    ClientContext, ContextFlags, FramedTransport, Mechanism, NameType, ServerContext, TransportSettings,
    mech::loopback::Loopback,
};

const SERVICE: &str = "TestService";

#[test]
fn negotiates_over_a_socket() {
    let mech = Loopback::new(b"secret").with_extra_rounds(1);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server_mech = mech.clone();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut server = ServerContext::new(server_mech, FramedTransport::new(stream));
        server.acquire_accept_credential(SERVICE, NameType::HostBasedService).unwrap();
        server.accept_client().unwrap();
        let message = server.recv_message().unwrap();
        server.send_mic(&message.data).unwrap();
        server.mechanism().display_name(server.source_name().unwrap()).unwrap()
    });

    let stream = TcpStream::connect(addr).unwrap();
    let mut client = ClientContext::new(mech, FramedTransport::new(stream));
    client
        .init_connect(SERVICE, NameType::HostBasedService, ContextFlags::MUTUAL | ContextFlags::REPLAY)
        .unwrap();
    client.send_message(b"1234567890", true).unwrap();
    client.recv_mic(b"1234567890").unwrap();

    assert_eq!(server.join().unwrap(), "user@LOOPBACK");
}

#[test]
fn oversized_frame_aborts_negotiation() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(&u32::MAX.to_be_bytes()).unwrap();
    });

    let (stream, _) = listener.accept().unwrap();
    let settings = TransportSettings::default().max_token_len(1024);
    let mech = Loopback::new(b"secret");
    let mut server = ServerContext::new(mech.clone(), FramedTransport::with_settings(stream, settings));
    server.acquire_accept_credential(SERVICE, NameType::HostBasedService).unwrap();
    match server.accept_client() {
        Err(gsslayer::Error::Transport(io)) => assert_eq!(io.kind(), std::io::ErrorKind::InvalidData),
        other => panic!("expected a transport error, got {other:?}"),
    }
    peer.join().unwrap();
    drop(server);
    assert_eq!(mech.ledger().live_total(), 0);
}
