use clap::Parser;
use pingora_core::server::configuration::Opt;
use pingora_core::server::Server;
use std::path::PathBuf;
use std::sync::Arc;
use warren::config::Config;
use warren::gateway::Gateway;
use warren::logging::LogFormat;
use warren::service::bootstrap;
use warren::store::{MemoryStore, Store};

/// Warren - authorizing administration gateway for RabbitMQ clusters
#[derive(Parser, Debug)]
#[command(name = "warren")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Daemon mode
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Test configuration and exit
    #[arg(long)]
    test: bool,

    /// Upgrade workers gracefully
    #[arg(long)]
    upgrade: bool,

    /// Log output format: json or pretty
    #[arg(long, default_value = "json")]
    log_format: LogFormat,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();

    if let Err(e) = warren::logging::init_subscriber(args.log_format) {
        fail(format!("Failed to initialize logging subsystem: {}", e));
    }

    let config = Config::from_file(&args.config)
        .unwrap_or_else(|e| fail(format!("Failed to load configuration: {}", e)));
    if let Err(e) = config.validate() {
        fail(format!("Invalid configuration: {}", e));
    }

    let snapshot = config
        .storage
        .snapshot_path
        .as_ref()
        .map(|p| p.display().to_string());
    tracing::info!(
        config_file = %args.config.display(),
        server_address = %config.server.address,
        server_port = config.server.port,
        clusters = config.clusters.len(),
        jwt_enabled = config.jwt.as_ref().is_some_and(|j| j.enabled),
        snapshot = snapshot.as_deref(),
        "Configuration loaded successfully"
    );

    if args.test {
        println!("Configuration file {} is valid", args.config.display());
        return;
    }

    // Load the store and seed it before Pingora starts its own runtimes
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| fail(format!("Failed to create start-up runtime: {}", e)));
    let store: Arc<dyn Store> = runtime.block_on(async {
        let store = match &config.storage.snapshot_path {
            Some(path) => MemoryStore::open(path)
                .await
                .unwrap_or_else(|e| fail(format!("Failed to open store: {}", e))),
            None => {
                tracing::warn!("No storage.snapshot_path configured; state is lost on restart");
                MemoryStore::new()
            }
        };
        let report = bootstrap(&store, &config)
            .await
            .unwrap_or_else(|e| fail(format!("Bootstrap failed: {}", e)));
        tracing::info!(
            admin_created = report.admin_created,
            clusters_created = report.clusters_created,
            assignments_created = report.assignments_created,
            "Store bootstrap complete"
        );
        Arc::new(store) as Arc<dyn Store>
    });
    drop(runtime);

    let opt = Opt {
        daemon: args.daemon,
        upgrade: args.upgrade,
        ..Default::default()
    };

    let mut server = Server::new(Some(opt))
        .unwrap_or_else(|e| fail(format!("Failed to create Pingora server: {}", e)));
    server.bootstrap();

    let gateway = Gateway::new(&config, store)
        .unwrap_or_else(|e| fail(format!("Failed to create metrics registry: {}", e)));

    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, gateway);
    proxy_service.threads = Some(config.server.threads);

    let listen_addr = config.server.listen_addr();
    proxy_service.add_tcp(&listen_addr);

    tracing::info!(
        address = %listen_addr,
        threads = config.server.threads,
        "Starting Warren gateway"
    );

    server.add_service(proxy_service);
    server.run_forever();
}
