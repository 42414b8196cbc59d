use std::{
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use perch_rtc::{
    bus::http::{HttpBus, HttpBusConfig},
    controller::{ConnectController, FixedPermission, MediaPermission, Permission, PromptPermission},
    relay,
    util::init_log,
    BrokerConfig, DriveStatus, IceServer, MediaConfiguration,
};

/// How often the peer loop drains its relay mailbox.
const BUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "perch-rtc", about = "Peer-to-peer WebRTC calls", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the mailbox signaling relay
    Relay {
        #[arg(long, env = "PERCH_LISTEN", default_value = "0.0.0.0:3000")]
        listen: SocketAddr,
        /// Seconds an undelivered event is kept
        #[arg(long, env = "PERCH_TTL_SECS", default_value_t = 30)]
        ttl_secs: u32,
    },
    /// Call a peer through a relay
    Peer(PeerArgs),
}

#[derive(Args)]
struct PeerArgs {
    #[arg(long, env = "PERCH_RELAY", default_value = "http://127.0.0.1:3000")]
    relay: String,
    #[arg(long, env = "PERCH_CONNECTION_ID")]
    connection_id: String,
    #[arg(long, env = "PERCH_SELF_ID")]
    self_id: String,
    #[arg(long, env = "PERCH_PEER_ID")]
    peer_id: String,
    /// STUN server url, repeatable
    #[arg(long = "stun", env = "PERCH_STUN", value_delimiter = ',')]
    stun: Vec<String>,
    #[arg(long)]
    no_audio: bool,
    #[arg(long)]
    no_video: bool,
    /// Grant media permission without asking
    #[arg(long, short = 'y')]
    yes: bool,
    /// Address for the media socket, defaults to the first routable interface
    #[arg(long, env = "PERCH_BIND")]
    bind: Option<IpAddr>,
    #[arg(long, env = "PERCH_CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    connect_timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    init_log();
    let cli = Cli::parse();

    match cli.command {
        Command::Relay { listen, ttl_secs } => {
            info!("Starting relay...");
            relay::main(listen, relay::ttl_from_secs(ttl_secs)?)
        }
        Command::Peer(args) => {
            info!("Starting peer...");
            peer(args)
        }
    }
}

fn peer(args: PeerArgs) -> anyhow::Result<()> {
    let bus = HttpBus::new(HttpBusConfig {
        relay: args.relay,
        connection_id: args.connection_id,
        self_id: args.self_id,
        peer_id: args.peer_id,
        ice_servers: args.stun.into_iter().map(IceServer::stun).collect(),
    });

    let mut config =
        BrokerConfig::default().with_connect_timeout(Duration::from_secs(args.connect_timeout_secs));
    config.bind_addr = args.bind;

    let permission: Box<dyn MediaPermission> = if args.yes {
        Box::new(FixedPermission(Permission::Granted))
    } else {
        Box::new(PromptPermission)
    };

    let media = MediaConfiguration {
        audio: !args.no_audio,
        video: !args.no_video,
    };

    let controller = ConnectController::new(&bus, permission, config);

    let Some(mut broker) = controller.connect_with_permission(&media) else {
        let view = controller.view();
        anyhow::bail!(
            "call did not start ({:?}): {}",
            view.status,
            view.last_error.unwrap_or_default()
        );
    };

    let mut next_poll = Instant::now();

    loop {
        // Received events go to the handler the broker registered on connect.
        if Instant::now() >= next_poll {
            if let Err(e) = bus.poll().context("polling the relay") {
                warn!("{:#}", e);
            }
            next_poll = Instant::now() + BUS_POLL_INTERVAL;
        }

        if broker.drive(Duration::from_millis(50)) == DriveStatus::Finished {
            break;
        }
    }

    drop(broker);
    let view = controller.view();
    info!("Call ended: {:?}", view.status);

    match view.last_error {
        Some(e) => anyhow::bail!(e),
        None => Ok(()),
    }
}
