//! Command line definition

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rockvpn")]
#[command(about = "Rock VPN client core: VLESS translation, credentials, tunnel dry runs and proxy router")]
#[command(version)]
pub struct Cli {
    /// Config file (.toml or .json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Credential store file (overrides the config)
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG wins when set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Translate a vless:// link into XRay JSON
    Translate {
        /// VLESS URI
        uri: String,

        /// Local SOCKS port of the inbound
        #[arg(long)]
        socks_port: Option<u16>,

        /// Single-line JSON
        #[arg(long)]
        compact: bool,

        /// Print the Tun2Socks YAML instead
        #[arg(long)]
        tun2socks: bool,
    },

    /// Check TCP reachability of a server
    Probe {
        address: String,

        #[arg(short, long, default_value_t = rock_vpn::DEFAULT_PROBE_PORT)]
        port: u16,
    },

    /// Manage stored IPSec credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// List servers from the config
    Servers {
        /// Only this country code
        #[arg(long)]
        country: Option<String>,
    },

    /// Connect through the simulated OS backend
    Connect(ConnectArgs),

    /// Send one method-channel call through the simulated OS backend
    Call {
        /// Method name (e.g. getCurrentStatus)
        method: String,

        /// Arguments as a JSON object
        #[arg(default_value = "null")]
        arguments: String,
    },

    /// Talk to the proxy router backend
    Router(RouterArgs),
}

#[derive(Subcommand)]
pub enum CredentialsAction {
    /// Store credentials (overwrites)
    Save {
        #[arg(long)]
        server: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        shared_secret: String,
        #[arg(long)]
        country_code: Option<String>,
        #[arg(long)]
        country_name: Option<String>,
    },
    /// Show stored credentials (secrets redacted)
    Show,
    /// Forget stored credentials
    Clear,
}

#[derive(Args)]
pub struct ConnectArgs {
    #[command(subcommand)]
    pub target: ConnectTarget,

    /// Keep the tunnel up this many seconds before disconnecting
    #[arg(long, default_value_t = 0, global = true)]
    pub hold: u64,
}

#[derive(Subcommand)]
pub enum ConnectTarget {
    /// IPSec with the stored credentials
    Ipsec,
    /// VLESS via the packet tunnel
    Vless {
        uri: String,
        #[arg(long)]
        country_code: Option<String>,
        #[arg(long)]
        country_name: Option<String>,
    },
    /// A server from the config catalog
    Server { id: String },
}

#[derive(Args)]
pub struct RouterArgs {
    /// Router base URL (overrides the config)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Client id (random when omitted)
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    #[command(subcommand)]
    pub action: RouterAction,
}

#[derive(Subcommand)]
pub enum RouterAction {
    /// Register this device as a peer
    Register {
        #[arg(long, default_value = "rockvpn-cli")]
        device_name: String,
        #[arg(long)]
        country_code: Option<String>,
        #[arg(long)]
        socks_port: Option<u16>,
    },
    /// Send heartbeats
    Heartbeat {
        /// Keep sending at the configured interval for this many beats
        #[arg(long)]
        count: Option<u64>,
    },
    /// List peers
    Clients,
    /// Route through a peer
    Route { target: String },
    /// Ask the router to ping an address
    Ping {
        ip: String,
        #[arg(long)]
        port: Option<u16>,
    },
}
