//! hrobot - Ansible dynamic inventory for Hetzner dedicated servers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use hrobot_inventory::cache::{
    cache_key, load_servers, CacheMode, FileCache, InventoryCache, MemoryCache,
};
use hrobot_inventory::config::{Config, PASSWORD_ENV, USER_ENV};
use hrobot_inventory::output::{render_host, render_list, to_json};
use hrobot_inventory::providers::hetzner::{RobotApi, API_BASE_URL};
use hrobot_inventory::InventoryBuilder;

/// Ansible dynamic inventory for Hetzner Robot servers.
#[derive(Parser)]
#[command(name = "hrobot", version)]
#[command(about = "List Hetzner dedicated servers as an Ansible inventory")]
#[command(group(ArgGroup::new("mode").required(true).args(["list", "host"])))]
struct Cli {
    /// Inventory configuration (`*hrobot.yml` or `*hrobot.yaml`).
    #[arg(short, long, env = "HROBOT_CONFIG")]
    config: PathBuf,

    /// Print the whole inventory.
    #[arg(long)]
    list: bool,

    /// Print the variables of one host.
    #[arg(long, value_name = "NAME")]
    host: Option<String>,

    /// Ignore cached data and fetch from the API.
    #[arg(long, default_value = "false")]
    refresh_cache: bool,

    /// Pretty-print the JSON output.
    #[arg(long, default_value = "false")]
    pretty: bool,

    /// Robot API user, used when the configuration has none.
    #[arg(long, env = USER_ENV, hide_env_values = true)]
    api_user: Option<String>,

    /// Robot API password, used when the configuration has none.
    #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
    api_password: Option<String>,

    /// Robot API endpoint.
    #[arg(long, env = "HETZNER_ROBOT_URL", default_value = API_BASE_URL, hide = true)]
    api_url: String,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is the inventory.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let credentials = config
        .credentials_or(cli.api_user.clone(), cli.api_password.clone())
        .context("Robot API credentials are required")?;

    let api = RobotApi::with_base_url(&cli.api_url, credentials.user, credentials.password)
        .context("Failed to create Robot API client")?;

    let mode = CacheMode::from_flags(config.cache, cli.refresh_cache);
    let (mut cache, key): (Box<dyn InventoryCache>, String) = if mode == CacheMode::Disabled {
        (Box::new(MemoryCache::new()), String::new())
    } else {
        let dir = config.cache_dir()?;
        debug!(dir = %dir.display(), "Using file cache");
        (
            Box::new(FileCache::new(dir, config.cache_timeout)),
            cache_key(&cli.config)?,
        )
    };

    let servers = load_servers(&api, cache.as_mut(), &key, mode)
        .await
        .context("Failed to load servers")?;

    let build = InventoryBuilder::new(config.rules(), config.build_options())
        .build(&servers)
        .context("Failed to build inventory")?;

    let doc = match &cli.host {
        Some(host) if !cli.list => render_host(&build.inventory, host),
        _ => render_list(&build.inventory),
    };
    println!("{}", to_json(&doc, cli.pretty)?);

    Ok(())
}
