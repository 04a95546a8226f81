use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use campus_connectors::EnvSecretStore;
use campus_core::{
    CONFIG_FILE, GateConfig, default_config_dir, load_config_from_dir, write_default_config_files,
};
use campus_runtime::{Gate, GateRequest, Upstream, gated_router, shutdown_signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "campus-gate", about = "Tenant resolution and access control for the campus platform")]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a default gate.toml
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration and print the route table
    Check,
    /// Run one request through the gate with the live collaborators
    Decide {
        #[arg(long)]
        host: String,
        #[arg(long)]
        path: String,
        /// Access token, sent as a bearer header
        #[arg(long)]
        token: Option<String>,
        /// Raw Cookie header
        #[arg(long)]
        cookie: Option<String>,
    },
    /// Run the gate in front of an upstream
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
        /// Without an upstream, admitted requests get their context echoed back
        #[arg(long)]
        upstream: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);

    match cli.command {
        Commands::Init { force } => {
            let path = write_default_config_files(&cfg_dir, force)?;
            pout(
                cli.json,
                serde_json::json!({"message":"init complete","config_file":path}),
                &format!("Wrote {}", path.display()),
            )?;
        }
        Commands::Check => {
            let config = load(&cfg_dir)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary(&config))?);
            } else {
                print_summary(&config);
            }
        }
        Commands::Decide {
            host,
            path,
            token,
            cookie,
        } => {
            let gate = live_gate(&cfg_dir)?;
            let authorization = token.map(|t| format!("Bearer {t}"));
            let admission = gate
                .admit(&GateRequest {
                    host: &host,
                    path: &path,
                    cookie: cookie.as_deref(),
                    authorization: authorization.as_deref(),
                })
                .await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&admission)?);
            } else {
                println!("decision: {}", admission.decision.label());
                if let Some(location) = &admission.location {
                    println!("location: {location}");
                }
                if let Some(ctx) = &admission.context {
                    for (name, value) in ctx.header_pairs() {
                        println!("{name}: {value}");
                    }
                }
            }
        }
        Commands::Serve { listen, upstream } => {
            let gate = Arc::new(live_gate(&cfg_dir)?);
            let upstream = match upstream {
                Some(url) => {
                    let timeout = gate.config().timeouts.upstream;
                    Some(Arc::new(Upstream::new(&url, timeout)?))
                }
                None => None,
            };
            if let Some(u) = &upstream {
                info!(upstream = u.base_url(), "forwarding admitted requests");
            } else {
                info!("no upstream configured; echoing request context");
            }

            let app = gated_router(gate, upstream);
            let listener = tokio::net::TcpListener::bind(listen)
                .await
                .with_context(|| format!("failed to bind {listen}"))?;
            info!(%listen, "campus gate listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")?;
            info!("campus gate stopped");
        }
    }

    Ok(())
}

fn load(cfg_dir: &Path) -> anyhow::Result<GateConfig> {
    load_config_from_dir(cfg_dir).with_context(|| {
        format!(
            "could not load {} from {} (run `campus-gate init` to create one)",
            CONFIG_FILE,
            cfg_dir.display()
        )
    })
}

fn live_gate(cfg_dir: &Path) -> anyhow::Result<Gate> {
    let config = load(cfg_dir)?;
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let secrets = EnvSecretStore::with_dotenv_dir(&cwd);
    Gate::from_config(config, &secrets).context("failed to set up Supabase collaborators")
}

fn summary(config: &GateConfig) -> serde_json::Value {
    let routes: Vec<_> = config
        .policy
        .routes()
        .iter()
        .map(|r| {
            serde_json::json!({
                "prefix": r.prefix,
                "roles": r.roles.iter().map(|role| role.as_str()).collect::<Vec<_>>(),
                "tenant_scoped": r.tenant_scoped,
            })
        })
        .collect();
    serde_json::json!({
        "root_domain": config.platform.root_domain,
        "reserved_subdomains": config.policy.reserved_subdomains(),
        "public_paths": config.policy.public_paths(),
        "bypass_prefixes": config.policy.bypass_prefixes(),
        "routes": routes,
    })
}

fn print_summary(config: &GateConfig) {
    println!("Configuration OK ({})", config.platform.origin(None));
    println!(
        "Reserved: {}",
        config
            .policy
            .reserved_subdomains()
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Public:   {}", config.policy.public_paths().join(", "));
    println!();
    println!("{:<20} {:<32} {}", "PREFIX", "ROLES", "TENANT");
    for rule in config.policy.routes() {
        let roles = rule
            .roles
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let scope = if rule.tenant_scoped { "yes" } else { "no" };
        println!("{:<20} {:<32} {}", rule.prefix, roles, scope);
    }
}

fn pout(json_mode: bool, value: serde_json::Value, text: &str) -> anyhow::Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{text}");
    }
    Ok(())
}
