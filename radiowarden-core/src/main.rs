use anyhow::{Context, Result};
use clap::Parser;
use log::warn;

use radiowarden_core::{
    Coordinator, CoordinatorConfig, IoctlController, NetlinkChannel, Role,
};
use radiowarden_netlink::Nl80211Session;

/// Boot-time wireless interface setup for the dual-radio appliance.
#[derive(Parser, Debug)]
#[command(name = "radiowarden", version, about)]
struct Cli {
    /// Downgrade topology checks to warnings instead of failing.
    #[arg(long)]
    lenient: bool,

    /// Requested name for the uplink VIF (the driver may override it).
    #[arg(long, default_value = "sta0")]
    uplink_name: String,

    /// Tune the monitor interface to this 2.4 GHz channel after setup.
    #[arg(long)]
    channel: Option<u8>,

    /// Keep the uplink VIF's factory MAC instead of randomizing it.
    #[arg(long)]
    keep_factory_mac: bool,

    /// Leave VIFs that hold no role in place.
    #[arg(long)]
    keep_leftovers: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {}", err);
        for cause in err.chain().skip(1) {
            eprintln!("  -> {}", cause);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = CoordinatorConfig {
        uplink_name: cli.uplink_name,
        randomize_uplink_mac: !cli.keep_factory_mac,
        delete_leftover_vifs: !cli.keep_leftovers,
        ..CoordinatorConfig::default()
    };
    let mut coordinator = Coordinator::new(
        Box::new(NetlinkChannel::new()),
        Box::new(IoctlController::new()),
        config,
    );

    let init = coordinator
        .init(!cli.lenient)
        .context("wireless lifecycle initialization failed")?;
    for warning in &init.warnings {
        warn!("init: {}", warning);
    }

    let created = coordinator
        .create_interfaces()
        .context("wireless interface creation failed")?;
    for warning in &created.warnings {
        warn!("create: {}", warning);
    }

    if let Some(channel) = cli.channel {
        tune_monitor(&coordinator, channel)?;
    }

    for role in [Role::AccessPoint, Role::Monitor, Role::Uplink] {
        if let Some(name) = coordinator.resolved_name(role) {
            println!("{}={}", role.as_str(), name);
        }
    }
    Ok(())
}

fn tune_monitor(coordinator: &Coordinator, channel: u8) -> Result<()> {
    let monitor = coordinator
        .resolved_name(Role::Monitor)
        .context("no monitor interface resolved")?;
    let mut session = Nl80211Session::open().context("could not open nl80211 session")?;
    session
        .set_channel(monitor, channel)
        .with_context(|| format!("could not tune {} to channel {}", monitor, channel))?;
    Ok(())
}
