//! Rock VPN command line
//!
//! Main entry point. Initializes the global allocator, sets up logging,
//! loads the config and runs one command.

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command, ConnectTarget, CredentialsAction, RouterAction, RouterArgs};
use rock_router::ProxyRouterClient;
use rock_vpn::{
    CredentialStore, FileStore, MethodCall, MethodChannel, MethodResult, RockConfig,
    ServerConnection, SimulatedBackend, Tun2SocksConfig, VpnCredentials, VpnManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => RockConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RockConfig::default(),
    };

    match cli.command {
        Command::Translate {
            ref uri,
            socks_port,
            compact,
            tun2socks,
        } => {
            let port = socks_port.unwrap_or(config.tunnel.socks_port);
            let xray = rock_vpn::translate(uri)?.with_socks_port(port);
            if tun2socks {
                print!("{}", Tun2SocksConfig::new(port).render()?);
            } else if compact {
                println!("{}", xray.to_json()?);
            } else {
                println!("{}", xray.to_json_pretty()?);
            }
        }

        Command::Probe { ref address, port } => {
            let timeout = Duration::from_secs(config.tunnel.probe_timeout_secs);
            let reachable = rock_vpn::probe(address, port, timeout).await;
            println!("{address}:{port} {}", if reachable { "reachable" } else { "unreachable" });
            if !reachable {
                std::process::exit(1);
            }
        }

        Command::Credentials { ref action } => {
            let store = credential_store(&cli, &config)?;
            match action {
                CredentialsAction::Save {
                    server,
                    username,
                    password,
                    shared_secret,
                    country_code,
                    country_name,
                } => {
                    let creds = VpnCredentials::new(server, username, password, shared_secret)
                        .with_country(country_code.clone(), country_name.clone());
                    store.save(&creds)?;
                    println!("Saved credentials for {} to {}", server, store.path().display());
                }
                CredentialsAction::Show => {
                    let creds = store.load()?;
                    println!("{creds:#?}");
                }
                CredentialsAction::Clear => {
                    store.clear()?;
                    println!("Cleared credentials in {}", store.path().display());
                }
            }
        }

        Command::Servers { ref country } => {
            let catalog = config.catalog();
            let servers: Vec<_> = match country {
                Some(code) => catalog.by_country(code).collect(),
                None => catalog.enabled().collect(),
            };
            if servers.is_empty() {
                println!("No servers configured");
            }
            for server in servers {
                let country = server.country();
                println!(
                    "{:<16} {:<6} {:<4} {:<20} {}",
                    server.id,
                    server.protocol,
                    country.code,
                    country.name,
                    server.host().unwrap_or_else(|| "-".to_string())
                );
            }
        }

        Command::Connect(ref args) => {
            let store = credential_store(&cli, &config)?;
            let manager = Arc::new(VpnManager::with_settings(
                Arc::new(SimulatedBackend::new().with_transition_delay(Duration::from_millis(200))),
                store,
                config.manager_settings(),
            ));
            connect(&manager, &args.target, &config).await?;

            let status = manager.current_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);

            if args.hold > 0 {
                tokio::time::sleep(Duration::from_secs(args.hold)).await;
                if let Ok(stats) = manager.traffic_stats().await {
                    info!("Traffic: {}", stats.format());
                }
                if let Some(duration) = manager.connection_duration().await {
                    info!("Connected for {}s", duration.as_secs());
                }
            }

            manager.disconnect().await?;
        }

        Command::Call {
            ref method,
            ref arguments,
        } => {
            let arguments: serde_json::Value =
                serde_json::from_str(arguments).context("arguments must be JSON")?;
            let store = credential_store(&cli, &config)?;
            let manager = VpnManager::with_settings(
                Arc::new(SimulatedBackend::new()),
                store,
                config.manager_settings(),
            );
            let channel = MethodChannel::new(Arc::new(manager));

            let (tx, mut rx) = tokio::sync::mpsc::channel(32);
            let forwarder = channel.forward_status(tx);

            let result = channel.handle(MethodCall::new(method.as_str(), arguments)).await;
            println!("{}", serde_json::to_string_pretty(&result)?);

            // Let the relay drain before reading the pushes
            tokio::time::sleep(Duration::from_millis(50)).await;
            forwarder.abort();
            while let Ok(push) = rx.try_recv() {
                println!("{}: {}", push.method, push.arguments);
            }

            if let MethodResult::Error { .. } | MethodResult::NotImplemented = result {
                std::process::exit(1);
            }
        }

        Command::Router(ref args) => router(args, &config).await?,
    }

    Ok(())
}

/// Initialize logging; RUST_LOG overrides the verbosity flag
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn credential_store(cli: &Cli, config: &RockConfig) -> Result<Arc<FileStore>> {
    let path = cli
        .credentials
        .clone()
        .or_else(|| config.credentials_path.clone())
        .unwrap_or_else(|| PathBuf::from("rockvpn-credentials.json"));
    Ok(Arc::new(FileStore::new(path)))
}

async fn connect(
    manager: &VpnManager<SimulatedBackend>,
    target: &ConnectTarget,
    config: &RockConfig,
) -> Result<()> {
    manager.initialize().await?;
    if !manager.request_permission().await? {
        bail!("VPN permission denied");
    }

    match target {
        ConnectTarget::Ipsec => manager.reconnect_ipsec().await?,
        ConnectTarget::Vless {
            uri,
            country_code,
            country_name,
        } => {
            manager
                .connect_vless(uri, country_code.as_deref(), country_name.as_deref())
                .await?
        }
        ConnectTarget::Server { id } => match config.catalog().find(id)?.connection()? {
            ServerConnection::IpSec(creds) => manager.connect_ipsec(creds).await?,
            ServerConnection::Vless {
                uri,
                country_code,
                country_name,
            } => {
                manager
                    .connect_vless(&uri, country_code.as_deref(), country_name.as_deref())
                    .await?
            }
        },
    }

    if let Some(tun) = manager.backend().tun2socks() {
        info!("Tun2Socks -> {}:{}", tun.socks_address, tun.socks_port);
    }
    Ok(())
}

async fn router(args: &RouterArgs, config: &RockConfig) -> Result<()> {
    let Some(base_url) = args.url.clone().or_else(|| config.router.base_url.clone()) else {
        bail!("no router URL: pass --url or set router.base_url");
    };

    let mut client = ProxyRouterClient::new(&base_url, config.router.timeout())?;
    if let Some(id) = &args.client_id {
        client = client.with_client_id(id.clone());
    }
    info!("Proxy router {} as {}", client.base_url(), client.client_id());

    match &args.action {
        RouterAction::Register {
            device_name,
            country_code,
            socks_port,
        } => {
            let port = socks_port.or(Some(config.tunnel.socks_port));
            let response = client
                .register(device_name, country_code.as_deref(), port)
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        RouterAction::Heartbeat { count: None } => {
            let response = client.heartbeat().await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        RouterAction::Heartbeat { count: Some(count) } => {
            let interval = config.router.heartbeat_interval();
            let client = Arc::new(client);
            let handle = client.spawn_heartbeat(interval);
            while handle.sent() + handle.failed() < *count {
                tokio::time::sleep(interval.min(Duration::from_millis(500))).await;
            }
            let (sent, failed) = (handle.sent(), handle.failed());
            handle.stop().await;
            println!("{sent} heartbeats sent, {failed} failed");
            if failed > 0 {
                warn!("{} heartbeats failed", failed);
            }
        }
        RouterAction::Clients => {
            for peer in client.clients().await? {
                println!(
                    "{:<24} {:<8} {:<16} {:<4} {}",
                    peer.client_id,
                    peer.platform.as_deref().unwrap_or("-"),
                    peer.public_ip.as_deref().unwrap_or("-"),
                    peer.country_code.as_deref().unwrap_or("-"),
                    if peer.online { "online" } else { "offline" }
                );
            }
        }
        RouterAction::Route { target } => {
            let response = client.route(target).await?;
            match response.proxy_endpoint() {
                Some(endpoint) => println!("SOCKS endpoint: {endpoint}"),
                None => bail!(
                    "route refused: {}",
                    response.message.as_deref().unwrap_or("no reason given")
                ),
            }
        }
        RouterAction::Ping { ip, port } => {
            let response = client.ping_ip(ip, *port).await?;
            match (response.reachable, response.latency_ms) {
                (true, Some(ms)) => println!("{ip} reachable ({ms} ms)"),
                (true, None) => println!("{ip} reachable"),
                (false, _) => println!("{ip} unreachable"),
            }
        }
    }

    Ok(())
}
