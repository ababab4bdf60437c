//! # gsslayer
//!
//! Negotiates a security context over TCP, one length-prefixed token at a time.
//!
//! - `gsslayer server` waits for clients, authenticates them, receives one sealed message from each
//!   and answers with a MIC over it
//! - `gsslayer client` connects, negotiates with a host-based service name, prints what was
//!   negotiated, sends a sealed message and verifies the MIC that comes back

use std::net::{SocketAddr, TcpListener, TcpStream};

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gsslayer::{
    ClientContext, ContextFlags, FramedTransport, Mechanism, NameType, ServerContext, export_flags, export_name,
    export_oid, mech::loopback::Loopback,
};
use tracing::{info, warn};

/// Security context negotiation test tool
#[derive(Parser)]
#[command(name = "gsslayer")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, env = "GSSLAYER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a server and authenticate to it
    Client(ClientArgs),
    /// Accept clients one at a time
    Server(ServerArgs),
}

#[derive(Args)]
struct ClientArgs {
    #[arg(long, env = "GSSLAYER_ADDR", default_value = "127.0.0.1:44444")]
    addr: SocketAddr,
    /// Service name, `service` or `service@host`
    #[arg(long, env = "GSSLAYER_SERVICE", default_value = "TestService")]
    service: String,
    /// Ask the server to authenticate itself too
    #[arg(long)]
    mutual: bool,
    #[arg(long, default_value = "1234567890")]
    message: String,
    #[command(flatten)]
    mech: MechArgs,
}

#[derive(Args)]
struct ServerArgs {
    #[arg(long, env = "GSSLAYER_LISTEN", default_value = "127.0.0.1:44444")]
    listen: SocketAddr,
    #[arg(long, env = "GSSLAYER_SERVICE", default_value = "TestService")]
    service: String,
    #[arg(long, value_enum, default_value_t = NameTypeArg::Host)]
    name_type: NameTypeArg,
    #[command(flatten)]
    mech: MechArgs,
}

#[derive(Args)]
struct MechArgs {
    #[arg(long, value_enum, env = "GSSLAYER_MECH", default_value_t = MechKind::Loopback)]
    mech: MechKind,
    /// Shared secret of the loopback mechanism
    #[arg(long, env = "GSSLAYER_SECRET", default_value = "gsslayer", hide_env_values = true)]
    secret: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum MechKind {
    Loopback,
    #[cfg(feature = "gssapi")]
    Gssapi,
}

#[derive(Clone, Copy, ValueEnum)]
enum NameTypeArg {
    Host,
    User,
}
impl From<NameTypeArg> for NameType {
    fn from(value: NameTypeArg) -> Self {
        match value {
            NameTypeArg::Host => NameType::HostBasedService,
            NameTypeArg::User => NameType::UserName,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Command::Client(args) => match args.mech.mech {
            MechKind::Loopback => run_client(Loopback::new(args.mech.secret.as_bytes()), &args),
            #[cfg(feature = "gssapi")]
            MechKind::Gssapi => run_client(gsslayer::mech::gssapi::Gssapi, &args),
        },
        Command::Server(args) => match args.mech.mech {
            MechKind::Loopback => run_server(Loopback::new(args.mech.secret.as_bytes()), &args),
            #[cfg(feature = "gssapi")]
            MechKind::Gssapi => run_server(gsslayer::mech::gssapi::Gssapi, &args),
        },
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

fn run_client<M: Mechanism>(mech: M, args: &ClientArgs) -> Result<()> {
    println!("service id: {}", args.service);
    let mut flags = ContextFlags::REPLAY;
    if args.mutual {
        flags |= ContextFlags::MUTUAL;
    }
    let stream = TcpStream::connect(args.addr).with_context(|| format!("Failed to connect to {}", args.addr))?;
    let mut client = ClientContext::new(mech, FramedTransport::new(stream));
    client.init_connect(&args.service, NameType::HostBasedService, flags)?;

    let names = client.mech_names();
    let mech = client.mech_type().map_or_else(
        || "unknown".to_owned(),
        |oid| export_oid(client.mechanism(), oid).unwrap_or_else(|_| oid.to_string()),
    );
    println!("mechanism {mech} supports {} names", names.len());
    for name in &names {
        println!(" - mech name: {name}");
    }
    for flag in export_flags(client.support_flags()) {
        println!("supported flag: {flag}");
    }

    let message = args.message.as_bytes();
    client.send_message(message, true)?;
    println!("send data: success");
    client.recv_mic(message)?;
    println!("recv mic: verified");
    Ok(())
}

fn run_server<M: Mechanism + Clone>(mech: M, args: &ServerArgs) -> Result<()> {
    let listener = TcpListener::bind(args.listen).with_context(|| format!("Failed to bind {}", args.listen))?;
    info!(addr = %listener.local_addr()?, service = %args.service, "listening");
    for stream in listener.incoming() {
        let stream = stream.context("Failed to accept connection")?;
        let peer = stream.peer_addr().ok();
        let mut server = ServerContext::new(mech.clone(), FramedTransport::new(stream));
        server.acquire_accept_credential(&args.service, args.name_type.into())?;
        if let Err(err) = serve(&mut server) {
            warn!(?peer, %err, "client session failed");
        }
    }
    Ok(())
}

fn serve<M: Mechanism>(server: &mut ServerContext<M, FramedTransport<TcpStream>>) -> Result<()> {
    server.accept_client()?;
    let client = server
        .source_name()
        .and_then(|name| export_name(server.mechanism(), name).ok())
        .unwrap_or_else(|| "unknown".to_owned());
    let mech = server.mech_type().map(ToString::to_string).unwrap_or_default();
    let flags: Vec<_> = export_flags(server.support_flags()).iter().map(|f| f.name()).collect();
    info!(%client, %mech, ?flags, "client authenticated");

    let message = server.recv_message()?;
    info!(
        len = message.data.len(),
        encrypted = message.was_encrypted,
        "received message: {}",
        String::from_utf8_lossy(&message.data)
    );
    server.send_mic(&message.data)?;
    Ok(())
}
