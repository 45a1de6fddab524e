//! Command-line entry point for tally servers and voters.
//!
//! `tally server` runs one of the four tally servers until it publishes a
//! result; `tally client` casts one vote and prints every server's tally.

use shamir_tally::net::{self, NodeConfig, PeerAddr, ServerNode, DEFAULT_PRIME, DEFAULT_WINDOW_SECS};
use shamir_tally::{Behaviour, RosterCorruption, SumCorruption};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 5_000;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_server_help() {
    println!("Usage: tally server --index <1-4> --listen <addr> --peer <i=addr> (x3) [flags]");
    println!("  --config <file.json>      load the whole configuration from JSON");
    println!("  --identity <name>         identity used in handshakes (default server<i>)");
    println!("  --main                    this server opens the voting window");
    println!("  --prime <p>               field modulus (default {DEFAULT_PRIME})");
    println!("  --degree <k>              sharing polynomial degree (only 1)");
    println!("  --window-secs <s>         voting window (default {DEFAULT_WINDOW_SECS})");
    println!("  --behaviour <kind>        honest | modulus | offset:<d> | random | negative |");
    println!("                            echo | empty | truncate:<n> | pad:<n>");
    println!("  --seed <u64>              seed for the behaviour RNG");
}

fn print_client_help() {
    println!("Usage: tally client --id <name> --vote <0|1> --server <addr> (x4) [flags]");
    println!("  --prime <p>               field modulus (default {DEFAULT_PRIME})");
    println!("  --timeout-ms <ms>         connect/handshake timeout (default {DEFAULT_CLIENT_TIMEOUT_MS})");
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("server") => cmd_server(args.collect()),
        Some("client") => cmd_client(args.collect()),
        _ => {
            eprintln!("Usage: tally <server|client> ...");
            std::process::exit(1);
        }
    }
}

fn next_value(iter: &mut impl Iterator<Item = String>, flag: &str) -> String {
    iter.next()
        .unwrap_or_else(|| fatal(&format!("{flag} expects a value")))
}

fn parse_value<T: std::str::FromStr>(value: &str, flag: &str) -> T {
    value
        .parse()
        .unwrap_or_else(|_| fatal(&format!("invalid value for {flag}: {value}")))
}

fn parse_peer(value: &str) -> PeerAddr {
    let (index, addr) = value
        .split_once('=')
        .unwrap_or_else(|| fatal("--peer expects <index>=<addr>"));
    PeerAddr {
        index: parse_value(index, "--peer"),
        addr: parse_value(addr, "--peer"),
    }
}

fn parse_behaviour(value: &str) -> Behaviour {
    let (kind, arg) = match value.split_once(':') {
        Some((kind, arg)) => (kind, Some(arg)),
        None => (value, None),
    };
    let count = |flag: &str| -> usize {
        parse_value(arg.unwrap_or_else(|| fatal(&format!("{flag} expects <kind>:<n>"))), "--behaviour")
    };
    match kind {
        "honest" => Behaviour::Honest,
        "modulus" => Behaviour::CorruptSum(SumCorruption::Modulus),
        "offset" => {
            let delta = arg.unwrap_or_else(|| fatal("offset expects offset:<d>"));
            Behaviour::CorruptSum(SumCorruption::Offset(parse_value(delta, "--behaviour")))
        }
        "random" => Behaviour::CorruptSum(SumCorruption::Random),
        "negative" => Behaviour::CorruptSum(SumCorruption::Negative),
        "echo" => Behaviour::CorruptRoster(RosterCorruption::Echo),
        "empty" => Behaviour::CorruptRoster(RosterCorruption::Empty),
        "truncate" => Behaviour::CorruptRoster(RosterCorruption::Truncate(count("truncate"))),
        "pad" => Behaviour::CorruptRoster(RosterCorruption::Pad(count("pad"))),
        other => fatal(&format!("unknown behaviour {other}")),
    }
}

fn build_runtime() -> tokio::runtime::Runtime {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    builder
        .build()
        .unwrap_or_else(|err| fatal(&format!("failed to start runtime: {err}")))
}

fn cmd_server(tail: Vec<String>) {
    let mut config_path: Option<PathBuf> = None;
    let mut identity: Option<String> = None;
    let mut index: Option<u64> = None;
    let mut listen: Option<SocketAddr> = None;
    let mut peers = Vec::new();
    let mut main = false;
    let mut prime: Option<u64> = None;
    let mut degree: Option<usize> = None;
    let mut window_secs: Option<u64> = None;
    let mut behaviour: Option<Behaviour> = None;
    let mut seed: Option<u64> = None;

    let mut iter = tail.into_iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "-h" | "--help" => {
                print_server_help();
                return;
            }
            "--config" => config_path = Some(PathBuf::from(next_value(&mut iter, "--config"))),
            "--identity" => identity = Some(next_value(&mut iter, "--identity")),
            "--index" => index = Some(parse_value(&next_value(&mut iter, "--index"), "--index")),
            "--listen" => listen = Some(parse_value(&next_value(&mut iter, "--listen"), "--listen")),
            "--peer" => peers.push(parse_peer(&next_value(&mut iter, "--peer"))),
            "--main" => main = true,
            "--prime" => prime = Some(parse_value(&next_value(&mut iter, "--prime"), "--prime")),
            "--degree" => degree = Some(parse_value(&next_value(&mut iter, "--degree"), "--degree")),
            "--window-secs" => {
                window_secs = Some(parse_value(&next_value(&mut iter, "--window-secs"), "--window-secs"))
            }
            "--behaviour" => behaviour = Some(parse_behaviour(&next_value(&mut iter, "--behaviour"))),
            "--seed" => seed = Some(parse_value(&next_value(&mut iter, "--seed"), "--seed")),
            other => fatal(&format!("unknown flag {other}")),
        }
    }

    let mut config = match config_path {
        Some(path) => NodeConfig::from_json_path(&path).unwrap_or_else(|err| fatal(&err.to_string())),
        None => {
            let index = index.unwrap_or_else(|| fatal("--index is required"));
            let listen = listen.unwrap_or_else(|| fatal("--listen is required"));
            NodeConfig::new(format!("server{index}"), index, listen, std::mem::take(&mut peers))
        }
    };
    if let Some(identity) = identity {
        config.identity = identity;
    }
    if let Some(index) = index {
        config.index = index;
    }
    if let Some(listen) = listen {
        config.listen = listen;
    }
    if !peers.is_empty() {
        config.peers = peers;
    }
    config.main |= main;
    if let Some(prime) = prime {
        config.prime = prime;
    }
    if let Some(degree) = degree {
        config.degree = degree;
    }
    if let Some(secs) = window_secs {
        config.window_ms = secs * 1000;
    }
    if let Some(behaviour) = behaviour {
        config.behaviour = behaviour;
    }
    if seed.is_some() {
        config.seed = seed;
    }
    let config = config.apply_env();
    let node = ServerNode::new(config).unwrap_or_else(|err| fatal(&err.to_string()));

    let runtime = build_runtime();
    let outcome = runtime.block_on(async move {
        let handle = node.start().await?;
        let halt = tokio::signal::ctrl_c();
        tokio::pin!(halt);
        let results = handle.results();
        tokio::pin!(results);
        tokio::select! {
            outcome = &mut results => outcome,
            signal = &mut halt => {
                if signal.is_ok() {
                    tracing::info!("interrupt received, halting");
                }
                Err(net::NetworkError::Halted)
            }
        }
    });
    match outcome {
        Ok(results) => println!(
            "{}",
            serde_json::to_string(&results).unwrap_or_else(|err| fatal(&err.to_string()))
        ),
        Err(err) => fatal(&format!("server failed: {err}")),
    }
}

fn cmd_client(tail: Vec<String>) {
    let mut identity: Option<String> = None;
    let mut vote: Option<u64> = None;
    let mut servers: Vec<SocketAddr> = Vec::new();
    let mut prime = DEFAULT_PRIME;
    let mut timeout_ms = DEFAULT_CLIENT_TIMEOUT_MS;

    let mut iter = tail.into_iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "-h" | "--help" => {
                print_client_help();
                return;
            }
            "--id" => identity = Some(next_value(&mut iter, "--id")),
            "--vote" => vote = Some(parse_value(&next_value(&mut iter, "--vote"), "--vote")),
            "--server" => servers.push(parse_value(&next_value(&mut iter, "--server"), "--server")),
            "--prime" => prime = parse_value(&next_value(&mut iter, "--prime"), "--prime"),
            "--timeout-ms" => timeout_ms = parse_value(&next_value(&mut iter, "--timeout-ms"), "--timeout-ms"),
            other => fatal(&format!("unknown flag {other}")),
        }
    }
    let identity = identity.unwrap_or_else(|| fatal("--id is required"));
    let vote = vote.unwrap_or_else(|| fatal("--vote is required"));

    let runtime = build_runtime();
    let tallies = runtime
        .block_on(net::vote(
            &identity,
            vote,
            prime,
            &servers,
            Duration::from_millis(timeout_ms),
            &mut rand::thread_rng(),
        ))
        .unwrap_or_else(|err| fatal(&format!("vote failed: {err}")));
    for (index, results) in tallies {
        println!(
            "server {index}: {}",
            serde_json::to_string(&results).unwrap_or_else(|err| fatal(&err.to_string()))
        );
    }
}
