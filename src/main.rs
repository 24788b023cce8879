//! redns-rust - A regex-ready and scriptable authoritative DNS server
//! written in Rust

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use redns_rust::dns_server::{Bind, DnsServer};
use redns_rust::reload;
use redns_rust::script::{NoScriptEngine, ScriptEngine};
use redns_rust::zone::Zone;

// 自定义本地时间格式化器，解决日志默认输出 UTC 时间的问题
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "redns-rust")]
#[command(about = "A regex-ready and scriptable authoritative DNS server written in Rust", long_about = None)]
struct Args {
    /// Zone files to serve (repeatable)
    #[arg(short, long = "zone", default_value = "zone.conf")]
    zone: Vec<String>,

    /// Listen endpoints as <proto>:<addr>:<port> (repeatable)
    #[arg(short, long = "bind")]
    bind: Vec<String>,

    /// Don't synthesize the in-addr.arpa reverse zone
    #[arg(long)]
    no_reverse_zone: bool,

    /// Seconds between zone file change checks
    #[arg(long, default_value_t = 30)]
    reload_interval: u64,
}

fn main() -> Result<()> {
    // 按真实 CPU 核心数构建多线程引擎
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("redns-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cores))
}

async fn async_main(cores: usize) -> Result<()> {
    std::fs::create_dir_all("logs").unwrap_or_default();

    let file_appender = RollingFileAppender::new(
        "logs/redns.log",
        RollingConditionBasic::new().daily(),
        30, // 仅保留最近 30 天的历史日志
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stdout).with_timer(LocalTimer))
        .init();

    let args = Args::parse();
    info!("Starting redns-rust version {}", env!("CARGO_PKG_VERSION"));
    info!(">>> Multi-core optimization enabled: utilizing {} independent worker threads", cores);

    let binds = if args.bind.is_empty() {
        vec![
            "udp:0.0.0.0:5553".parse::<Bind>()?,
            "tcp:0.0.0.0:5553".parse::<Bind>()?,
        ]
    } else {
        args.bind
            .iter()
            .map(|b| b.parse::<Bind>())
            .collect::<Result<Vec<_>>>()?
    };

    // 脚本引擎在此注入; 默认构建不带解释器, 含脚本的 zone 文件会在装载时报错
    let engine: Arc<dyn ScriptEngine> = Arc::new(NoScriptEngine);

    let mut zones = Vec::new();
    for path in &args.zone {
        let abs_path = std::fs::canonicalize(path)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.clone());
        let zone = Zone::from_file(&abs_path, engine.clone())?;
        info!("Serving requests for zone '{}'.", zone.origin());
        zones.push(Arc::new(zone));
    }

    if !args.no_reverse_zone {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        let addresses: Vec<_> = binds.iter().map(|b| b.addr.ip()).collect();
        let reverse = Zone::reverse(&host, &addresses);
        info!("Serving requests for zone '{}'.", reverse.origin());
        zones.push(Arc::new(reverse));
    }

    if zones.is_empty() {
        anyhow::bail!("No zones to serve");
    }

    let zones = Arc::new(zones);

    let interval = Duration::from_secs(args.reload_interval.max(2));
    let _watcher = reload::spawn(zones.clone(), interval, interval / 2);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, draining in-flight queries...");
        let _ = shutdown_tx.send(true);
    });

    let server = DnsServer::new(zones);
    server.run(binds, shutdown_rx).await?;

    info!("Exiting...");
    Ok(())
}
