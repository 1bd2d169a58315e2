//! Lightduel Node
//!
//! Runs one node role over the UDP radio stand-in. The host reads console
//! commands as JSON lines on stdin and writes console events to stdout;
//! a player reads `hit [strength]` / `reset` lines. Logs go to stderr.

use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lightduel::{
    core::clock::{Clock, MonotonicClock, Timestamp},
    game::render::MemoryStrip,
    network::{
        console::{convert_notification, ConsoleCommand, ConsoleEvent},
        mailbox::{mailbox, MailboxReceiver},
        transport::{HardwareAddr, Radio, UdpRadio},
    },
    node::{drain_mailbox, PeerConfig},
    DisplayNode, HostNode, Node, NodeConfig, PlayerNode, DISPLAY_ID, HOST_ID, PLAYER_A_ID, PLAYER_B_ID,
    TICK_INTERVAL_MS, VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    Host,
    PlayerA,
    PlayerB,
    Display,
}

impl Role {
    fn node_id(self) -> u8 {
        match self {
            Role::Host => HOST_ID,
            Role::PlayerA => PLAYER_A_ID,
            Role::PlayerB => PLAYER_B_ID,
            Role::Display => DISPLAY_ID,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "lightduel-node", version, about = "Run a Lightduel node")]
struct Args {
    /// Node role
    #[arg(long, value_enum)]
    role: Role,

    /// JSON config file; missing fields use defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local UDP address standing in for the radio
    #[arg(long, default_value = "0.0.0.0:47000")]
    bind: SocketAddr,

    /// Host radio address, as `ip:port` or `AA:BB:CC:DD:EE:FF`
    #[arg(long)]
    host_addr: Option<String>,
}

fn parse_radio_addr(text: &str) -> Result<HardwareAddr> {
    if let Ok(sock) = text.parse::<SocketAddrV4>() {
        return Ok(HardwareAddr::from_socket(sock));
    }
    HardwareAddr::parse(text).with_context(|| format!("bad radio address {:?}", text))
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let host_addr = args.host_addr.as_deref().map(parse_radio_addr).transpose()?;
    let node_id = args.role.node_id();

    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::for_node(node_id, host_addr),
    };
    config.node_id = node_id;

    if let (Some(addr), false) = (host_addr, args.role == Role::Host) {
        config.peers.retain(|p| p.node_id != HOST_ID);
        config.peers.push(PeerConfig { node_id: HOST_ID, address: Some(addr.to_string()) });
    }
    config.validate()?;
    Ok(config)
}

/// Node plus whatever local collaborators its role needs.
enum Runner {
    Host(HostNode),
    Player(PlayerNode),
    Display(DisplayNode, MemoryStrip),
}

fn flush<N: Node>(node: &mut N, radio: &impl Radio) {
    for out in node.take_outgoing() {
        radio.send(out.to, &out.bytes);
    }
}

fn step<N: Node>(node: &mut N, rx: &mut MailboxReceiver, radio: &impl Radio, now: Timestamp) {
    drain_mailbox(node, rx, now);
    node.tick(now);
    flush(node, radio);
}

fn emit(event: &ConsoleEvent) {
    match event.to_json() {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to encode console event: {}", e),
    }
}

impl Runner {
    fn tick(&mut self, rx: &mut MailboxReceiver, radio: &impl Radio, now: Timestamp) {
        match self {
            Runner::Host(host) => {
                step(host, rx, radio, now);
                for n in host.take_notifications() {
                    if let Some(event) = convert_notification(&n) {
                        emit(&event);
                    }
                }
            }
            Runner::Player(player) => {
                step(player, rx, radio, now);
                for n in player.take_notifications() {
                    debug!("{:?}", n.data);
                }
            }
            Runner::Display(display, strip) => {
                step(display, rx, radio, now);
                display.render(now, strip);
                for n in display.take_notifications() {
                    debug!("{:?}", n.data);
                }
            }
        }
    }

    fn input(&mut self, line: &str, radio: &impl Radio, now: Timestamp) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match self {
            Runner::Host(host) => {
                match ConsoleCommand::from_json(line) {
                    Ok(ConsoleCommand::Heartbeat) => emit(&ConsoleEvent::Status(host.status_report())),
                    Ok(cmd) => host.handle_command(cmd, now),
                    Err(e) => emit(&ConsoleEvent::Error { message: format!("bad command: {}", e) }),
                }
                flush(host, radio);
            }
            Runner::Player(player) => {
                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (Some("hit"), strength) => {
                        let strength = strength.and_then(|s| s.parse().ok()).unwrap_or(512);
                        player.report_hit(strength, now);
                    }
                    (Some("reset"), _) => player.request_reset(),
                    _ => warn!("Unknown input {:?} (expected `hit [strength]` or `reset`)", line),
                }
                flush(player, radio);
            }
            Runner::Display(..) => debug!("Display ignores console input"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Lightduel node v{}", VERSION);
    info!("Role: {:?} (node {}), track of {} LEDs", args.role, config.node_id, config.track_len);

    let radio = UdpRadio::bind(args.bind).await?;
    info!("Radio address {} ({})", radio.local_addr(), radio.local_addr().to_socket());

    let (tx, mut rx) = mailbox(config.mailbox_capacity);
    tokio::spawn(radio.clone().run_receiver(tx));

    let mut runner = match args.role {
        Role::Host => Runner::Host(HostNode::new(config)?),
        Role::PlayerA | Role::PlayerB => Runner::Player(PlayerNode::new(config)?),
        Role::Display => {
            let strip = MemoryStrip::new(config.track_len as usize);
            Runner::Display(DisplayNode::new(config)?, strip)
        }
    };

    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let clock = MonotonicClock::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => runner.tick(&mut rx, &radio, clock.now()),
            Some(line) = line_rx.recv() => runner.input(&line, &radio, clock.now()),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if rx.dropped() > 0 {
        warn!("Mailbox overflowed {} times", rx.dropped());
    }
    info!("Shutting down");
    Ok(())
}
