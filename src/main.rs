//! Skyhook - k3s clusters on public clouds in one command
//!
//! This is the main CLI entry point for Skyhook.

use clap::{Parser, Subcommand};
use skyhook::cloud::Cloud;
use skyhook::config::AppConfig;
use skyhook::error::{Result, SkyhookError};
use skyhook::install::LOCAL_KUBECONFIG;
use skyhook::orchestrator::{BuildOptions, Context, Orchestrator};
use std::io::{BufRead, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Skyhook - k3s clusters on public clouds
#[derive(Parser)]
#[command(name = "skyhook")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Create a k3s cluster on a public cloud in one command", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a VM and install k3s on it
    Build {
        /// Cloud to deploy to
        #[arg(short, long)]
        cloud: Option<Cloud>,
        /// Cluster name
        #[arg(short, long)]
        name: Option<String>,
        /// Region, closest by latency if omitted
        #[arg(short, long)]
        region: Option<String>,
        /// VM size
        #[arg(short, long)]
        size: Option<String>,
        /// k3s channel or release (stable, latest, 1.18, v1.18.10+k3s1)
        #[arg(short, long)]
        k3s_version: Option<String>,
    },

    /// Delete the cluster deployed from this directory
    Teardown {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List clusters created by skyhook
    #[command(name = "list")]
    List,

    /// List installable k3s releases
    #[command(name = "k3s-versions")]
    K3sVersions,

    /// Show the closest region of a cloud
    Regions {
        /// Cloud to probe
        cloud: Cloud,
    },

    /// List supported clouds
    Clouds,

    /// Store provider credentials
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show or change default settings
    Default {
        #[command(subcommand)]
        command: DefaultCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Save the API token for a cloud
    ApiKey {
        /// Cloud the token belongs to
        cloud: Cloud,
        /// API token
        key: String,
    },
}

#[derive(Subcommand)]
enum DefaultCommands {
    /// Show current defaults
    List,
    /// Set the default cloud
    Cloud { cloud: Cloud },
    /// Set the default region
    Region { region: String },
    /// Set the default VM size
    Size { size: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    let context = Context::load()?;

    match command {
        Commands::Build {
            cloud,
            name,
            region,
            size,
            k3s_version,
        } => {
            let orchestrator = Orchestrator::new(context)?;
            let options = BuildOptions {
                cloud,
                name,
                region,
                size,
                k3s_version,
            };

            let record = orchestrator.build(options).await?;
            println!(
                "Cluster {} is up on {} ({}) at {}",
                record.name, record.cloud, record.region, record.ip
            );
            println!("k3s {}", record.k3s_version);
            println!(
                "export KUBECONFIG={}",
                orchestrator.context().work_dir.join(LOCAL_KUBECONFIG).display()
            );
        }

        Commands::Teardown { yes } => {
            let record = context.state().load()?;
            if !yes && !confirm(&format!("Delete {} ({}) on {}?", record.name, record.id, record.cloud))? {
                println!("Aborted");
                return Ok(());
            }

            let orchestrator = Orchestrator::new(context)?;
            let record = orchestrator.teardown().await?;
            println!("Cluster {} deleted", record.name);
        }

        Commands::List => {
            let orchestrator = Orchestrator::new(context)?;
            let vms = orchestrator.list_vms().await?;

            println!(
                "{:<14} {:<38} {:<20} {:<14} {:<16} {:<12}",
                "CLOUD", "ID", "NAME", "REGION", "IP", "STATUS"
            );
            for (cloud, vm) in vms {
                println!(
                    "{:<14} {:<38} {:<20} {:<14} {:<16} {:<12}",
                    cloud.to_string(),
                    vm.id,
                    vm.name,
                    vm.region,
                    vm.public_ipv4().unwrap_or("-"),
                    vm.status.to_string()
                );
            }
        }

        Commands::K3sVersions => {
            let orchestrator = Orchestrator::new(context)?;
            let listing = orchestrator.k3s_versions().await?;

            if let Some(latest) = listing.latest {
                println!("latest: {}", latest);
            }
            if let Some(stable) = listing.stable {
                println!("stable: {}", stable);
            }
            for (channel, releases) in listing.channels {
                println!("{}: {}", channel, releases.join(", "));
            }
        }

        Commands::Regions { cloud } => {
            let orchestrator = Orchestrator::new(context)?;
            let region = orchestrator.closest_region(cloud).await?;
            println!("Closest {} region: {}", cloud, region);
        }

        Commands::Clouds => {
            for cloud in Cloud::ALL {
                let status = if context.app.api_key(cloud).is_some() {
                    "configured"
                } else {
                    "no API token"
                };
                println!("{:<14} {}", cloud.to_string(), status);
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::ApiKey { cloud, key } => {
                // reload without environment overrides so they are not persisted
                let mut app = AppConfig::load(&AppConfig::default_path()?)?;
                app.set_api_key(cloud, &key);
                app.save()?;
                println!("API token for {} saved", cloud);
            }
        },

        Commands::Default { command } => {
            let mut app = AppConfig::load(&AppConfig::default_path()?)?;
            match command {
                DefaultCommands::List => {
                    let show = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
                    println!("cloud:  {}", show(app.default_cloud.map(|c| c.to_string())));
                    println!("region: {}", show(app.default_region));
                    println!("size:   {}", show(app.default_size));
                    return Ok(());
                }
                DefaultCommands::Cloud { cloud } => app.default_cloud = Some(cloud),
                DefaultCommands::Region { region } => app.default_region = Some(region),
                DefaultCommands::Size { size } => app.default_size = Some(size),
            }
            app.save()?;
            println!("Defaults saved");
        }

        Commands::Version => {
            println!("Skyhook version {}", env!("CARGO_PKG_VERSION"));
            println!(
                "OS/Arch:     {}/{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            );
        }
    }

    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Print an error with a hint on what to do about it
fn report(error: &SkyhookError) {
    eprintln!("Error: {}", error);

    match error {
        SkyhookError::AlreadyDeployed(_) => {
            eprintln!("Run `skyhook teardown` before building again");
        }
        SkyhookError::ReleaseNotFound(version) | SkyhookError::InvalidReleaseFormat(version) => {
            eprintln!(
                "'{}' is not an installable k3s release; see `skyhook k3s-versions`",
                version
            );
        }
        SkyhookError::MissingCredentials(cloud) => {
            let env = cloud
                .parse::<Cloud>()
                .map(|c| c.token_env())
                .unwrap_or("the provider token variable");
            eprintln!(
                "Run `skyhook config api-key {} <token>` or set {}",
                cloud, env
            );
        }
        SkyhookError::NotDeployed => {
            eprintln!("There is no deploy-state.yaml in this directory");
        }
        SkyhookError::InvalidSshKey(_) => {
            eprintln!("Set ssh-public-key in ~/.skyhook/config.yaml or create ~/.ssh/id_rsa.pub");
        }
        _ => {}
    }
}
