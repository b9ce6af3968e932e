//! The master daemon.

use actor_runtime::ActorSystem;
use clap::Parser;
use foreman::master::allocator::DrfAllocator;
use foreman::{Master, MASTER_ACTOR, MASTER_INSTALLS};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "master", about = "Cluster resource manager master")]
struct Opts {
    /// Port for actor messages.
    #[arg(long, default_value_t = 5050)]
    port: u16,

    /// Address this master advertises to slaves and frameworks.
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Port for the JSON endpoints.
    #[arg(long = "webui_port", default_value_t = 8080)]
    webui_port: u16,

    /// Allocation policy ("drf" is the only built-in).
    #[arg(long, default_value = "drf")]
    allocator: String,

    /// Leader-election rendezvous; external election is not part of this
    /// build, so only standalone operation is accepted.
    #[arg(long)]
    url: Option<String>,

    /// Write logs to this directory instead of stderr.
    #[arg(long = "log_dir")]
    log_dir: Option<PathBuf>,

    /// Only log warnings and errors.
    #[arg(long)]
    quiet: bool,
}

fn config_error(message: &str) -> ! {
    eprintln!("master: {message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };
    foreman::logging::setup_tracing("master", opts.quiet, opts.log_dir.as_deref())?;

    if opts.allocator != "drf" {
        config_error(&format!("unknown allocator '{}'", opts.allocator));
    }
    if let Some(url) = &opts.url {
        if url.starts_with("zoo://") || url.starts_with("zoofile://") {
            config_error(&format!(
                "'{url}' requires the external election layer; this build runs standalone"
            ));
        }
    }

    let config_vars = vec![
        ("port".to_string(), opts.port.to_string()),
        ("webui_port".to_string(), opts.webui_port.to_string()),
        ("allocator".to_string(), opts.allocator.clone()),
    ];

    let system = ActorSystem::bind(&opts.ip, opts.port).await?;
    let master = Master::new(Box::new(DrfAllocator::new()), config_vars);
    let addr = system.spawn(MASTER_ACTOR, master, MASTER_INSTALLS)?;
    info!(%addr, "master running");

    let webui = tokio::spawn(actor_runtime::http::serve(
        system.clone(),
        opts.ip.clone(),
        opts.webui_port,
    ));

    tokio::signal::ctrl_c().await?;
    info!("interrupted; shutting down");
    system.terminate(&addr);
    webui.abort();
    system.shutdown();
    Ok(())
}
