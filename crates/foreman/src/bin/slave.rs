//! The slave daemon.

use actor_runtime::ActorSystem;
use clap::Parser;
use foreman::detector::{self, MasterDetector, StandaloneDetector};
use foreman::messages::SlaveInfo;
use foreman::slave::isolation::{child_table, IsolationConfig, ProcessIsolation};
use foreman::slave::reaper::{ExecutorReaper, REAPER_ACTOR};
use foreman::{Resources, Slave, SLAVE_ACTOR, SLAVE_INSTALLS};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "slave", about = "Cluster resource manager slave")]
struct Opts {
    /// Master to register with: host:port or master(host:port).
    #[arg(long)]
    master: String,

    /// Port for actor messages.
    #[arg(long, default_value_t = 5051)]
    port: u16,

    /// Address this slave advertises.
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Port for the JSON endpoints.
    #[arg(long = "webui_port", default_value_t = 8081)]
    webui_port: u16,

    /// Total consumable resources on this machine.
    #[arg(long, default_value = "cpus:1;mem:1024")]
    resources: String,

    /// Where framework work directories are placed.
    #[arg(long = "work_dir")]
    work_dir: Option<PathBuf>,

    /// Directory prepended to relative executor paths.
    #[arg(long = "frameworks_home")]
    frameworks_home: Option<PathBuf>,

    /// Where to find a Hadoop installation for executor fetching.
    #[arg(long = "hadoop_home")]
    hadoop_home: Option<PathBuf>,

    /// Run tasks as the submitting user rather than the slave's user.
    #[arg(long = "switch_user", default_value_t = true, action = clap::ArgAction::Set)]
    switch_user: bool,

    /// Redirect executor stdout/stderr into the work directory.
    #[arg(long = "redirect_io", default_value_t = true, action = clap::ArgAction::Set)]
    redirect_io: bool,

    /// Publicly reachable name, if different from the hostname.
    #[arg(long = "public_dns")]
    public_dns: Option<String>,

    /// Write logs to this directory instead of stderr.
    #[arg(long = "log_dir")]
    log_dir: Option<PathBuf>,

    /// Only log warnings and errors.
    #[arg(long)]
    quiet: bool,
}

fn config_error(message: &str) -> ! {
    eprintln!("slave: {message}");
    std::process::exit(1);
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
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
    foreman::logging::setup_tracing("slave", opts.quiet, opts.log_dir.as_deref())?;

    let master = match detector::parse_master_url(&opts.master) {
        Ok(addr) => addr,
        Err(e) => config_error(&e.to_string()),
    };
    let resources = match Resources::parse(&opts.resources) {
        Ok(resources) => resources,
        Err(e) => config_error(&e.to_string()),
    };

    let hostname = hostname();
    let public_hostname = opts
        .public_dns
        .clone()
        .or_else(|| std::env::var("MESOS_PUBLIC_DNS").ok())
        .unwrap_or_else(|| hostname.clone());
    let work_dir = opts
        .work_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("foreman"));

    let config_vars = vec![
        ("port".to_string(), opts.port.to_string()),
        ("webui_port".to_string(), opts.webui_port.to_string()),
        ("resources".to_string(), opts.resources.clone()),
        ("work_dir".to_string(), work_dir.display().to_string()),
        ("switch_user".to_string(), opts.switch_user.to_string()),
    ];

    let system = ActorSystem::bind(&opts.ip, opts.port).await?;
    let children = child_table();
    let isolation = ProcessIsolation::new(
        IsolationConfig {
            home: std::env::var("MESOS_HOME").ok().map(PathBuf::from),
            frameworks_home: opts.frameworks_home.clone(),
            hadoop_home: opts.hadoop_home.clone(),
            switch_user: opts.switch_user,
            redirect_io: opts.redirect_io,
            public_hostname: public_hostname.clone(),
        },
        children.clone(),
    );
    let slave = Slave::new(
        SlaveInfo {
            hostname,
            public_hostname,
            resources,
        },
        Box::new(isolation),
        work_dir,
        config_vars,
    );
    let addr = system.spawn(SLAVE_ACTOR, slave, SLAVE_INSTALLS)?;
    system.spawn(REAPER_ACTOR, ExecutorReaper::new(addr.clone(), children), &[])?;
    info!(%addr, master = %master, "slave running");

    let detector = Box::new(StandaloneDetector::new(master));
    tokio::spawn(detector.run(system.clone(), addr.clone()));

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
