//! ipfs-tiles: publish MBTiles archives on IPFS
//!
//! Commands:
//!   create <archive>    - publish a tileset, creating its IPNS key on first use
//!   update <archive>    - merge a changed archive into an existing tileset
//!   delete <tileset>    - remove the IPNS key, unpin the root, drop the TileJSON
//!   status              - node version and published tilesets
//!   list                - tileset ids with their keys and current roots
//!   config show         - display current configuration

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use ipt_archive::MbtilesArchive;
use ipt_core::config::{IptConfig, LinkMode};
use ipt_publish::{DescriptorOverrides, Flow, ProgressFn, PublishOptions, PublishReport, Publisher};
use ipt_storage::{build_descriptor_operator, check_health, KuboClient};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "ipfs-tiles",
    version,
    about = "Publish MBTiles archives on IPFS",
    long_about = "ipfs-tiles: publish MBTiles archives as content-addressed directories behind a stable IPNS name"
)]
struct Cli {
    /// Path to ipfs-tiles.toml configuration file
    #[arg(long, short = 'c', env = "IPT_CONFIG", default_value = "ipfs-tiles.toml")]
    config: PathBuf,

    /// Kubo RPC API endpoint (overrides node.api_url)
    #[arg(long, global = true, env = "IPT_IPFS")]
    ipfs: Option<String>,

    /// Directory receiving the TileJSON documents (overrides descriptor.dir)
    #[arg(long, global = true)]
    descriptor_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Log format (overrides log.format)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LinkModeArg {
    /// Tiles addressed through the IPNS name (follows every update)
    Ipns,
    /// Tiles addressed through the immutable root
    Ipfs,
}

impl From<LinkModeArg> for LinkMode {
    fn from(arg: LinkModeArg) -> Self {
        match arg {
            LinkModeArg::Ipns => LinkMode::Ipns,
            LinkModeArg::Ipfs => LinkMode::Ipfs,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct PublishArgs {
    /// MBTiles archive
    archive: PathBuf,

    /// Tileset id (default: archive file name without extension)
    #[arg(long)]
    id: Option<String>,

    /// Title used in the TileJSON (default: archive name)
    #[arg(long)]
    title: Option<String>,

    /// Description used in the TileJSON
    #[arg(long)]
    desc: Option<String>,

    /// Attribution used in the TileJSON
    #[arg(long)]
    attribution: Option<String>,

    /// Version used in the TileJSON
    #[arg(long)]
    tileset_version: Option<String>,

    /// Fixed domain for tile links, replaces gateway + address
    #[arg(long)]
    domain: Option<String>,

    /// Public gateway used in tile links (overrides publish.gateway)
    #[arg(long)]
    gateway: Option<String>,

    /// How tile links address the tileset (overrides publish.link_mode)
    #[arg(long, value_enum)]
    link_mode: Option<LinkModeArg>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish a tileset; creates its IPNS key on first use
    ///
    /// When the tileset was published before, only changed tiles are
    /// uploaded and merged into the previous root.
    Create {
        #[command(flatten)]
        args: PublishArgs,
        /// Rebuild the whole directory instead of merging
        #[arg(long)]
        full: bool,
    },

    /// Merge a changed archive into an already published tileset
    Update {
        #[command(flatten)]
        args: PublishArgs,
    },

    /// Remove a tileset: IPNS key, root pin and TileJSON document
    Delete {
        /// Tileset id
        id: String,
    },

    /// Show node status and published tilesets
    Status,

    /// List tilesets with their IPNS ids and current roots
    List,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file + flags)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config).await?;
    apply_global_flags(&mut config, &cli);
    if let Commands::Create { args, .. } | Commands::Update { args } = &cli.command {
        apply_publish_flags(&mut config, args);
    }
    config.validate().context("invalid configuration")?;

    init_logging(&config.log.level, &config.log.format);
    debug!(config = %cli.config.display(), node = %config.node.api_url, "starting");

    match cli.command {
        Commands::Create { args, full } => cmd_publish(&config, &args, Flow::Create, full).await,
        Commands::Update { args } => cmd_publish(&config, &args, Flow::Update, false).await,
        Commands::Delete { id } => cmd_delete(&config, &id).await,
        Commands::Status => cmd_status(&config).await,
        Commands::List => cmd_list(&config).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn load_config(path: &Path) -> Result<IptConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(IptConfig::default())
    }
}

fn apply_global_flags(config: &mut IptConfig, cli: &Cli) {
    if let Some(url) = &cli.ipfs {
        config.node.api_url = url.clone();
    }
    if let Some(dir) = &cli.descriptor_dir {
        config.descriptor.dir = dir.clone();
    }
    if cli.debug {
        config.log.level = "debug".into();
    }
    if let Some(format) = cli.log_format {
        config.log.format = match format {
            LogFormat::Json => "json".into(),
            LogFormat::Text => "text".into(),
        };
    }
}

fn apply_publish_flags(config: &mut IptConfig, args: &PublishArgs) {
    if let Some(gateway) = &args.gateway {
        config.publish.gateway = gateway.clone();
    }
    if let Some(domain) = &args.domain {
        config.publish.domain = Some(domain.clone());
    }
    if let Some(mode) = args.link_mode {
        config.publish.link_mode = mode.into();
    }
}

fn connect(config: &IptConfig) -> Result<KuboClient> {
    KuboClient::new(&config.node).with_context(|| format!("connecting to {}", config.node.api_url))
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {pos} entries {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `ipfs-tiles create` / `ipfs-tiles update` ─────────────────────────────────

async fn cmd_publish(config: &IptConfig, args: &PublishArgs, flow: Flow, full: bool) -> Result<()> {
    let archive = MbtilesArchive::open(&args.archive)
        .with_context(|| format!("opening archive: {}", args.archive.display()))?;
    let node = connect(config)?;
    let output = build_descriptor_operator(&config.descriptor.dir)
        .with_context(|| format!("opening descriptor dir: {}", config.descriptor.dir.display()))?;

    println!(
        "Publishing {} (node: {})",
        args.archive.display(),
        config.node.api_url
    );

    let pb = make_spinner(&flow.to_string());
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, _total, msg| {
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });

    let publisher = Publisher::new(&node, config, output).with_progress(progress);
    let opts = PublishOptions {
        flow,
        tileset_id: args.id.clone(),
        force_full: full,
        overrides: DescriptorOverrides {
            title: args.title.clone(),
            description: args.desc.clone(),
            attribution: args.attribution.clone(),
            version: args.tileset_version.clone(),
        },
    };

    let report = match publisher.run(&archive, &opts).await {
        Ok(report) => report,
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e).with_context(|| format!("{flow} {}", args.archive.display()));
        }
    };
    pb.finish_with_message("done");
    print_report(config, &report);
    Ok(())
}

fn print_report(config: &IptConfig, report: &PublishReport) {
    println!();
    if report.published {
        println!("Published {}:", report.tileset_id);
    } else {
        println!("{} unchanged:", report.tileset_id);
    }
    println!("  key:        {} ({})", report.key.name, report.key.id);
    println!("  root:       {}", report.root);
    if let Some(previous) = &report.previous {
        println!("  previous:   {previous}");
    }
    println!("  mode:       {}", report.mode);
    println!(
        "  entries:    {} ({} changed, {} unchanged)",
        report.stats.entries, report.stats.changed, report.stats.unchanged
    );
    println!("  bytes:      {}", fmt_bytes(report.stats.bytes));
    println!(
        "  tilejson:   {}",
        config.descriptor.dir.join(&report.descriptor_path).display()
    );
    for template in &report.descriptor.tiles {
        println!("  tiles:      {template}");
    }
}

// ── `ipfs-tiles delete` ───────────────────────────────────────────────────────

async fn cmd_delete(config: &IptConfig, id: &str) -> Result<()> {
    let node = connect(config)?;
    let output = build_descriptor_operator(&config.descriptor.dir)
        .with_context(|| format!("opening descriptor dir: {}", config.descriptor.dir.display()))?;
    let publisher = Publisher::new(&node, config, output);

    let report = publisher
        .delete(id)
        .await
        .with_context(|| format!("deleting tileset {id}"))?;

    println!("Deleted {}:", report.tileset_id);
    println!("  key:        {} ({})", report.key.name, report.key.id);
    match (&report.root, report.unpinned) {
        (Some(root), true) => println!("  unpinned:   {root}"),
        (Some(root), false) => println!("  unpin failed: {root} (see log)"),
        (None, _) => println!("  root:       none published"),
    }
    if !report.descriptor_removed {
        println!("  tilejson:   could not be removed (see log)");
    }
    Ok(())
}

// ── `ipfs-tiles status` / `ipfs-tiles list` ───────────────────────────────────

async fn cmd_status(config: &IptConfig) -> Result<()> {
    let node = connect(config)?;
    let output = build_descriptor_operator(&config.descriptor.dir)?;
    let publisher = Publisher::new(&node, config, output);

    println!("ipfs-tiles v{}", env!("CARGO_PKG_VERSION"));
    println!("  node:       {}", config.node.api_url);
    match check_health(&node).await {
        Ok(version) => println!("  kubo:       {version}"),
        Err(e) => {
            println!("  kubo:       UNREACHABLE ({e})");
            return Ok(());
        }
    }
    println!("  gateway:    {}", config.publish.gateway);
    println!("  tilejson:   {}", config.descriptor.dir.display());

    let tilesets = publisher
        .namer()
        .list_tilesets()
        .await
        .context("listing tileset keys")?;
    println!("  tilesets:   {}", tilesets.len());
    Ok(())
}

async fn cmd_list(config: &IptConfig) -> Result<()> {
    let node = connect(config)?;
    let output = build_descriptor_operator(&config.descriptor.dir)?;
    let publisher = Publisher::new(&node, config, output);
    let namer = publisher.namer();

    let tilesets = namer.list_tilesets().await.context("listing tileset keys")?;
    if tilesets.is_empty() {
        println!("no tilesets");
        return Ok(());
    }
    for (id, key) in tilesets {
        let root = namer
            .resolve_current_root(&key)
            .await
            .map(|cid| cid.to_string())
            .unwrap_or_else(|| "-".into());
        println!("{id:<24} {:<64} {root}", key.id);
    }
    Ok(())
}

// ── `ipfs-tiles config show` ──────────────────────────────────────────────────

fn cmd_config_show(config: &IptConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
