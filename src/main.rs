/// oxide-engine - pluggable Kubernetes cluster provisioning
///
/// Creates, updates and removes clusters through driver plugins, keeping a
/// resumable record of every cluster under the state directory.
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oxide_engine::cluster::{ConfigGetter, Orchestrator, PersistStore};
use oxide_engine::config::{
    CliConfigGetter, ClusterSpec, EngineConfig, SpecConfigGetter, DEFAULT_CONFIG_FILE,
};
use oxide_engine::plugin::{address_channel, DriverRegistry, LaunchMode, Launcher, PluginHandle};
use oxide_engine::rpc::{DriverServer, EPHEMERAL_LISTEN_ADDR};
use oxide_engine::store::FileStore;
use oxide_engine::types::{DriverFlags, OptionValue};

#[derive(Parser)]
#[command(name = "oxide-engine")]
#[command(about = "Provision Kubernetes clusters through pluggable drivers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a cluster, or resume an interrupted create
    Create {
        /// Cluster name (taken from the spec file when omitted)
        name: Option<String>,

        /// Driver to provision with
        #[arg(short, long)]
        driver: Option<String>,

        /// Declarative cluster spec file
        #[arg(short, long)]
        spec: Option<PathBuf>,

        /// Driver option as key=value; repeat for lists
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Update a running cluster
    Update {
        name: String,

        /// Declarative cluster spec file
        #[arg(short, long)]
        spec: Option<PathBuf>,

        /// Driver option as key=value; repeat for lists
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Remove a cluster and forget it
    #[command(alias = "rm")]
    Remove { name: String },

    /// List known clusters
    Ls,

    /// Show a cluster record with credentials redacted
    Inspect { name: String },

    /// List built-in drivers, or show the options of one
    Drivers { name: Option<String> },

    /// Generate example configuration file
    Init,

    /// Serve one driver over the plugin protocol
    #[command(hide = true)]
    ServePlugin {
        #[arg(long)]
        driver: String,

        #[arg(long, default_value = EPHEMERAL_LISTEN_ADDR)]
        listen: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output and the plugin address
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("oxide_engine={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Create {
            ref name,
            ref driver,
            ref spec,
            ref set,
        } => create_cluster(&cli, name.clone(), driver.clone(), spec.clone(), set.clone()).await,
        Commands::Update {
            ref name,
            ref spec,
            ref set,
        } => update_cluster(&cli, name, spec.clone(), set.clone()).await,
        Commands::Remove { ref name } => remove_cluster(&cli, name).await,
        Commands::Ls => list_clusters(&cli).await,
        Commands::Inspect { ref name } => inspect_cluster(&cli, name).await,
        Commands::Drivers { ref name } => show_drivers(&cli, name.as_deref()).await,
        Commands::Init => init_config(&cli).await,
        Commands::ServePlugin {
            ref driver,
            ref listen,
        } => serve_plugin(driver, listen).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    EngineConfig::load_or_default(&cli.config).context("Failed to load configuration")
}

fn launcher(config: &EngineConfig) -> Result<Launcher> {
    let mode = if config.plugin.isolated {
        let program = std::env::current_exe().context("Failed to locate own executable")?;
        LaunchMode::Subprocess { program }
    } else {
        LaunchMode::InProcess
    };

    Ok(Launcher::new(DriverRegistry::builtin())
        .with_mode(mode)
        .with_timeouts(config.plugin.timeouts.to_call_timeouts())
        .with_external_addr(config.plugin.listen_addr.clone()))
}

fn store(config: &EngineConfig) -> Arc<FileStore> {
    Arc::new(FileStore::new(&config.state_dir))
}

/// Config Port for a command: spec file options, or `--set` pairs typed by `flags`
fn config_getter(
    name: &str,
    spec: Option<ClusterSpec>,
    set: Vec<String>,
    flags: DriverFlags,
    for_update: bool,
) -> Result<Arc<dyn ConfigGetter>> {
    match spec {
        Some(spec) => {
            if !set.is_empty() {
                anyhow::bail!("--set cannot be combined with --spec");
            }
            let getter = SpecConfigGetter::new(spec);
            let getter = if for_update {
                getter.with_update_flags(flags)
            } else {
                getter.with_flags(flags)
            };
            Ok(Arc::new(getter))
        }
        None => {
            let getter = CliConfigGetter::new(name, flags, set);
            let getter = if for_update {
                getter.without_defaults()
            } else {
                getter
            };
            Ok(Arc::new(getter))
        }
    }
}

/// Create a cluster
async fn create_cluster(
    cli: &Cli,
    name: Option<String>,
    driver: Option<String>,
    spec_path: Option<PathBuf>,
    set: Vec<String>,
) -> Result<()> {
    let config = load_config(cli)?;

    let spec = spec_path
        .map(|path| {
            ClusterSpec::from_file(&path)
                .with_context(|| format!("Failed to load cluster spec {}", path.display()))
        })
        .transpose()?;

    let name = name
        .or_else(|| spec.as_ref().map(|s| s.name.clone()))
        .context("A cluster name is required")?;
    let driver = driver
        .or_else(|| spec.as_ref().map(|s| s.driver.clone()))
        .context("A driver is required (--driver or spec file)")?;
    if let Some(spec) = &spec {
        if spec.name != name || spec.driver != driver {
            anyhow::bail!(
                "Arguments ({} / {}) disagree with spec file ({} / {})",
                name,
                driver,
                spec.name,
                spec.driver
            );
        }
    }

    info!("Creating cluster {} with driver {}", name, driver);
    let plugin = launcher(&config)?
        .connect(&driver)
        .await
        .with_context(|| format!("Failed to start driver {}", driver))?;
    let flags = plugin
        .driver()
        .create_options()
        .await
        .context("Failed to fetch create options")?;

    let getter = config_getter(&name, spec, set, flags, false)?;
    let orchestrator = Orchestrator::with_plugin(&name, plugin, getter, store(&config));
    let cluster = orchestrator
        .create()
        .await
        .with_context(|| format!("Failed to create cluster {}", name))?;

    info!("✓ Cluster {} is {}", cluster.name, status_label(&cluster));
    info!("  Endpoint: {}", cluster.endpoint);
    Ok(())
}

/// Update a cluster
async fn update_cluster(
    cli: &Cli,
    name: &str,
    spec_path: Option<PathBuf>,
    set: Vec<String>,
) -> Result<()> {
    let config = load_config(cli)?;
    let store = store(&config);
    let record = store
        .load(name)
        .await
        .with_context(|| format!("Failed to load cluster {}", name))?;

    let spec = spec_path
        .map(|path| {
            ClusterSpec::from_file(&path)
                .with_context(|| format!("Failed to load cluster spec {}", path.display()))
        })
        .transpose()?;
    if let Some(spec) = &spec {
        if spec.name != name {
            anyhow::bail!("Spec file describes cluster {}, not {}", spec.name, name);
        }
    }

    let plugin = connect(&config, &record.driver_name).await?;
    let flags = plugin
        .driver()
        .update_options()
        .await
        .context("Failed to fetch update options")?;

    let getter = config_getter(name, spec, set, flags, true)?;
    let orchestrator = Orchestrator::with_plugin(name, plugin, getter, store);
    let cluster = orchestrator
        .update()
        .await
        .with_context(|| format!("Failed to update cluster {}", name))?;

    info!("✓ Cluster {} is {}", cluster.name, status_label(&cluster));
    Ok(())
}

/// Remove a cluster
async fn remove_cluster(cli: &Cli, name: &str) -> Result<()> {
    let config = load_config(cli)?;
    let store = store(&config);
    let record = store
        .load(name)
        .await
        .with_context(|| format!("Failed to load cluster {}", name))?;

    let plugin = connect(&config, &record.driver_name).await?;
    let getter = Arc::new(CliConfigGetter::new(name, DriverFlags::new(), Vec::new()));
    let orchestrator = Orchestrator::with_plugin(name, plugin, getter, store);
    orchestrator
        .remove()
        .await
        .with_context(|| format!("Failed to remove cluster {}", name))?;

    info!("✓ Cluster {} removed", name);
    Ok(())
}

async fn connect(config: &EngineConfig, driver: &str) -> Result<PluginHandle> {
    launcher(config)?
        .connect(driver)
        .await
        .with_context(|| format!("Failed to start driver {}", driver))
}

fn status_label(cluster: &oxide_engine::cluster::Cluster) -> String {
    cluster
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// List known clusters
async fn list_clusters(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let clusters = FileStore::new(&config.state_dir)
        .list()
        .await
        .context("Failed to list clusters")?;

    if clusters.is_empty() {
        info!("No clusters found in {}", config.state_dir.display());
        return Ok(());
    }

    println!("{:<24} {:<12} {:<12} ENDPOINT", "NAME", "DRIVER", "STATUS");
    for cluster in &clusters {
        println!(
            "{:<24} {:<12} {:<12} {}",
            cluster.name,
            cluster.driver_name,
            status_label(cluster),
            cluster.endpoint
        );
    }
    Ok(())
}

/// Show one cluster record
async fn inspect_cluster(cli: &Cli, name: &str) -> Result<()> {
    let config = load_config(cli)?;
    let cluster = FileStore::new(&config.state_dir)
        .load(name)
        .await
        .with_context(|| format!("Failed to load cluster {}", name))?;

    println!("{}", serde_json::to_string_pretty(&cluster.redacted())?);
    Ok(())
}

/// List drivers or describe one
async fn show_drivers(cli: &Cli, name: Option<&str>) -> Result<()> {
    let Some(name) = name else {
        for driver in DriverRegistry::builtin().names() {
            println!("{}", driver);
        }
        return Ok(());
    };

    let config = load_config(cli)?;
    let plugin = connect(&config, name).await?;
    let driver = plugin.driver();

    let create = driver.create_options().await.context("Failed to fetch create options")?;
    let update = driver.update_options().await.context("Failed to fetch update options")?;

    println!("Create options:");
    print_flags(&create);
    println!("Update options:");
    print_flags(&update);

    let capabilities: Vec<String> = driver.capabilities().iter().map(|c| c.to_string()).collect();
    if !capabilities.is_empty() {
        println!("Capabilities: {}", capabilities.join(", "));
    }
    Ok(())
}

fn print_flags(flags: &DriverFlags) {
    for (name, flag) in &flags.options {
        let default = match &flag.default {
            Some(OptionValue::String(s)) => format!(" (default {:?})", s),
            Some(OptionValue::Bool(b)) => format!(" (default {})", b),
            Some(OptionValue::Int(i)) => format!(" (default {})", i),
            Some(OptionValue::StringSlice(v)) => format!(" (default {})", v.join(",")),
            None => String::new(),
        };
        println!("  {:<24} {:<12} {}{}", name, flag.option_type, flag.usage, default);
    }
}

/// Initialize example configuration file
async fn init_config(cli: &Cli) -> Result<()> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let yaml = serde_yaml::to_string(&EngineConfig::example())?;
    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the configuration file to match your requirements");
    info!("  2. Import an existing cluster:");
    info!("     oxide-engine create demo --driver import --set endpoint=10.0.0.1:6443");

    Ok(())
}

/// Serve one driver and print its bound address on stdout
async fn serve_plugin(driver_name: &str, listen: &str) -> Result<()> {
    let registry = DriverRegistry::builtin();
    let mut stdout = std::io::stdout();

    let Some(driver) = registry.get(driver_name) else {
        warn!("Driver {} is not built in", driver_name);
        writeln!(stdout)?;
        stdout.flush()?;
        return Ok(());
    };

    let (publisher, promise) = address_channel();
    let server = DriverServer::new(driver_name, driver);
    let listen = listen.to_string();
    let task = tokio::spawn(async move { server.serve(&listen, publisher).await });

    let addr = promise.wait().await.context("Plugin server failed to start")?;
    writeln!(stdout, "{}", addr)?;
    stdout.flush()?;

    task.await
        .context("Plugin server task panicked")?
        .context("Plugin server failed")?;
    Ok(())
}
