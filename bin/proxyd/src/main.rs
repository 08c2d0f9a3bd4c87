use std::{io, net::SocketAddr, time::Duration};

use anyhow::Context;
use clap::Parser;
use interpose_core::{ProxyEngine, TcpConnector, TcpTransport};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use mio::{net::TcpListener, Events, Poll, Token};
use protocol::{Forward, FrameParser, Negotiator, NullNegotiator, RawParser, TokenNegotiator};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::dispatcher::MioDispatcher;

mod dispatcher;

const LISTENER: Token = Token(0);

pub const METRICS_CONN_COUNT: &str = "interpose_conn_count";
pub const METRICS_CONN_LIVE: &str = "interpose_conn_live";

/// Intercepting TCP proxy: accepts downstream connections and bridges each
/// one to the upstream server, optionally gating on a handshake token and
/// re-framing traffic.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP address to accept downstream connections on
    #[arg(env, long, default_value = "0.0.0.0:5222")]
    listen: SocketAddr,

    /// TCP address of the upstream server
    #[arg(env, long)]
    upstream: SocketAddr,

    /// Token each downstream must send before its traffic is bridged
    #[arg(env, long)]
    handshake_token: Option<String>,

    /// Treat traffic as length-prefixed frames instead of a raw byte stream
    #[arg(env, long)]
    framed: bool,
}

type Engine = ProxyEngine<TcpConnector, Vec<u8>>;

fn main() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    if std::env::var_os("RUST_BACKTRACE").is_none() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }
    let args: Args = Args::parse();
    tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();

    describe_counter!(METRICS_CONN_COUNT, "Total downstream connections accepted");
    describe_gauge!(METRICS_CONN_LIVE, "Live connections in the engine table");

    let mut listener =
        TcpListener::bind(args.listen).with_context(|| format!("bind {}", args.listen))?;
    let mut poll = Poll::new().context("create poll")?;
    poll.registry().register(&mut listener, LISTENER, mio::Interest::READABLE)?;

    let mut engine: Engine = ProxyEngine::new(TcpConnector);
    let mut dispatcher = MioDispatcher::default();
    let mut events = Events::with_capacity(256);

    log::info!("[Proxyd] listening on {} bridging to {}", args.listen, args.upstream);

    loop {
        if let Err(err) = poll.poll(&mut events, Some(Duration::from_secs(1))) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err).context("poll");
        }

        for event in events.iter() {
            match event.token() {
                LISTENER => accept_loop(&mut listener, &mut engine, &mut dispatcher, &args),
                token => {
                    let id = MioDispatcher::conn_of(token);
                    if event.is_writable() && dispatcher.wants_connect(id) {
                        engine.handle_connect(id, &mut dispatcher);
                    }
                    // epoll here is edge-triggered: drain until the engine
                    // reports no more pending work on this socket
                    if event.is_readable() {
                        while dispatcher.wants_read(id) && engine.handle_read(id, &mut dispatcher) {}
                    }
                    if event.is_writable() {
                        while dispatcher.wants_write(id) && engine.handle_write(id, &mut dispatcher) {
                        }
                    }
                }
            }
        }

        dispatcher.sync(poll.registry(), &mut engine).context("sync poll registry")?;
        gauge!(METRICS_CONN_LIVE).set(engine.len() as f64);
    }
}

fn accept_loop(
    listener: &mut TcpListener,
    engine: &mut Engine,
    dispatcher: &mut MioDispatcher,
    args: &Args,
) {
    loop {
        let (stream, remote) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) => {
                log::error!("[Proxyd] accept error: {err}");
                break;
            }
        };
        counter!(METRICS_CONN_COUNT).increment(1);
        let client = engine.add_connection(
            TcpTransport::new(stream),
            downstream_negotiator(args),
            parser_for(args),
            Box::new(Forward),
        );
        log::info!("[Proxyd] accepted {remote} as conn {client}");
        match engine.request_connect(
            client,
            args.upstream,
            Box::new(NullNegotiator),
            parser_for(args),
            Box::new(Forward),
            dispatcher,
        ) {
            Ok(upstream) => {
                log::debug!("[Proxyd] conn {client} bridging via conn {upstream}");
            }
            Err(err) => {
                log::error!("[Proxyd] conn {client} failed to reach upstream: {err}");
                engine.request_close(client, dispatcher);
            }
        }
    }
}

fn downstream_negotiator(args: &Args) -> Box<dyn Negotiator> {
    match &args.handshake_token {
        Some(token) => Box::new(TokenNegotiator::new(token.clone().into_bytes())),
        None => Box::new(NullNegotiator),
    }
}

fn parser_for(args: &Args) -> Box<dyn protocol::Parser<Vec<u8>>> {
    if args.framed {
        Box::new(FrameParser::default())
    } else {
        Box::new(RawParser)
    }
}
