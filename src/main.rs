use std::path::PathBuf;
use std::process::ExitCode;

use structopt::StructOpt;
use tracing::Level;
use wsx_agent_core::model::{AutoSignWorkDirGuard, Decision};

#[derive(Debug, StructOpt)]
#[structopt(name = "wsx-agent", about = "WebSocks proxy agent core")]
struct Args {
    /// Path of the configuration file. Defaults to
    /// $HOME/.config/wsx-agent/config.conf
    #[structopt(short, long)]
    config: Option<PathBuf>,

    /// Report the decision for one destination instead of just summarizing
    /// the loaded policy. Format: host:port
    #[structopt(short, long)]
    classify: Option<String>,
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.join(".config").join("wsx-agent").join("config.conf"))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();
}

fn summarize(policy: &wsx_agent_core::policy::Policy) {
    let config = policy.config();
    tracing::info!(
        "loaded config: socks5={} http-connect={} ss={} dns={} pac={} groups={}",
        config.socks5_port,
        config.http_connect_port,
        config.ss_port,
        config.dns_port,
        config.pac_port,
        config.groups.len(),
    );
    for (alias, group) in config.groups.iter() {
        tracing::info!("  group {alias}: {} server(s)", group.entries.len());
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config_path = match args.config {
        Some(p) => p,
        None => default_config_path()?,
    };
    let policy = wsx_agent_core::load(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", config_path.display()))?;
    // Removes the auto-sign working directory on the way out of this scope
    // if (and only if) the parser allocated it itself.
    let _auto_sign_cleanup = AutoSignWorkDirGuard::for_config(policy.config());
    summarize(&policy);

    if let Some(target) = args.classify {
        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--classify expects host:port"))?;
        let port: u16 = port.parse()?;
        let decision = policy.classify(host, port);
        print_decision(host, port, &decision);
    }
    Ok(())
}

fn print_decision(host: &str, port: u16, decision: &Decision) {
    match decision {
        Decision::Direct => println!("{host}:{port} -> Direct"),
        Decision::HttpsRelay { group_alias } => {
            println!("{host}:{port} -> HttpsRelay({group_alias})")
        }
        Decision::NoProxy { group_alias } => println!("{host}:{port} -> NoProxy({group_alias})"),
        Decision::Proxy {
            group_alias,
            resolve_at_upstream,
            https_relay,
        } => println!(
            "{host}:{port} -> Proxy(group={group_alias}, resolve_at_upstream={resolve_at_upstream}, https_relay={https_relay})"
        ),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::from_args();
    match run(args) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(1)
        }
    }
}
