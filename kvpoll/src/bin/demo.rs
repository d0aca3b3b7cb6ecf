//! Host frame loop over the loopback network.
//!
//! Simulates a single-threaded host: every tick it issues a few commands,
//! publishes a message, then polls both sessions once. All output comes from
//! callbacks, so it is printed on the main thread only.
//!
//! # Usage
//!
//! ```sh
//! kvpoll-demo --ticks 20 --tick-ms 50
//! ```

use std::time::Duration;

use thiserror::Error;

use kvpoll::{
    Callback, Client, ConnectOptions, Hook, HostValue, LoopbackServer, SessionConfig,
    SessionError, Subscriber,
};

const DEFAULT_TICKS: u32 = 10;
const DEFAULT_TICK_MS: u64 = 50;

#[derive(Debug, Error)]
enum DemoError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug)]
struct DemoConfig {
    ticks: u32,
    tick: Duration,
}

fn main() {
    kvpoll::init_tracing();
    if let Err(e) = run() {
        eprintln!("kvpoll-demo: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), DemoError> {
    let args: Vec<String> = std::env::args().collect();
    let config = parse_args(&args)?;

    let server = LoopbackServer::new();
    let session_config = SessionConfig::from_env();
    let mut client = Client::with_config(server.client(), session_config, kvpoll::LogSink);
    let mut subscriber =
        Subscriber::with_config(server.subscriber(), session_config, kvpoll::LogSink);

    client.set_hook(Hook::OnConnected, Some(announce("client connected")))?;
    client.set_hook(Hook::OnDisconnected, Some(announce("client disconnected")))?;
    subscriber.set_hook(Hook::OnConnected, Some(announce("subscriber connected")))?;
    subscriber.set_hook(
        Hook::OnMessage,
        Some(Callback::infallible(|args| {
            println!("message on {}: {}", show(&args[0]), show(&args[1]));
        })),
    )?;

    client.connect(ConnectOptions::default())?;
    subscriber.connect(ConnectOptions::default())?;
    println!("{client} and {subscriber} connecting");

    let mut subscribed = false;
    for tick in 0..config.ticks {
        if !subscribed && subscriber.is_connected() {
            subscriber.psubscribe("demo.*", Some(print_reply("psubscribe")))?;
            subscriber.commit()?;
            subscribed = true;
        }

        if client.is_connected() {
            client.send_host(
                &["INCR".into(), "ticks".into()],
                Some(print_reply("INCR ticks")),
            )?;
            client.set_ex("last", 60, &tick.to_string(), None)?;
            client.publish("demo.tick", &format!("tick {tick}"), None)?;
            client.commit()?;
        }

        std::thread::sleep(config.tick);

        client.poll()?;
        subscriber.poll()?;
    }

    if client.is_connected() {
        client.ttl("last", Some(print_reply("TTL last")))?;
        client.commit()?;
        std::thread::sleep(config.tick);
        client.poll()?;
    } else {
        println!("{client} never connected");
    }

    client.close();
    subscriber.close();
    println!("{client} {subscriber}");
    Ok(())
}

fn announce(what: &'static str) -> Callback {
    Callback::infallible(move |_| println!("{what}"))
}

fn print_reply(label: &'static str) -> Callback {
    Callback::infallible(move |args| println!("{label} -> {}", show(&args[0])))
}

fn show(value: &HostValue) -> String {
    match value {
        HostValue::Nil => "nil".to_string(),
        HostValue::Array(items) => {
            let items: Vec<_> = items.iter().map(show).collect();
            format!("[{}]", items.join(", "))
        }
        scalar => scalar.to_command_arg().unwrap_or_default(),
    }
}

/// Parses command line arguments into a DemoConfig.
fn parse_args(args: &[String]) -> Result<DemoConfig, DemoError> {
    let mut ticks = DEFAULT_TICKS;
    let mut tick_ms = DEFAULT_TICK_MS;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--ticks" | "-n" => {
                i += 1;
                ticks = parse_value(args.get(i), "--ticks")?;
            }
            "--tick-ms" | "-t" => {
                i += 1;
                tick_ms = parse_value(args.get(i), "--tick-ms")?;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg => return Err(DemoError::Usage(format!("unknown argument: {arg}"))),
        }
        i += 1;
    }

    Ok(DemoConfig {
        ticks,
        tick: Duration::from_millis(tick_ms),
    })
}

fn parse_value<T: std::str::FromStr>(value: Option<&String>, flag: &str) -> Result<T, DemoError> {
    let value = value.ok_or_else(|| DemoError::Usage(format!("missing value for {flag}")))?;
    value
        .parse()
        .map_err(|_| DemoError::Usage(format!("invalid value for {flag}: {value}")))
}

fn print_usage() {
    eprintln!(
        r#"kvpoll-demo - poll-driven key-value client over the loopback network

USAGE:
    kvpoll-demo [OPTIONS]

OPTIONS:
    -n, --ticks <N>       Number of host frames to run (default: 10)
    -t, --tick-ms <MS>    Milliseconds between frames (default: 50)
    -h, --help            Print this help message

ENVIRONMENT:
    KVPOLL_POLL_BUDGET      Maximum actions handled per poll (default: unlimited)
    RUST_LOG                Log filter when built with --features tracing
"#
    );
}
