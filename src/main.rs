use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use promptgate::audit::{self, AuditLog};
use promptgate::cli::{Cli, Commands};
use promptgate::config::AppConfig;
use promptgate::detect::RegexDetector;
use promptgate::proxy::{AppState, GateServer};

fn data_dir() -> std::path::PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = std::path::PathBuf::from(home).join(".promptgate");
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn db_path(config: &AppConfig) -> std::path::PathBuf {
    config
        .audit
        .db_path
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| data_dir().join("promptgate.db"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            cmd_start(&cli.config).await?;
        }
        Commands::Logs {
            tail,
            export,
            format,
        } => {
            cmd_logs(&cli.config, tail, export, &format)?;
        }
        Commands::Init => {
            cmd_init(&cli.config)?;
        }
    }

    Ok(())
}

async fn cmd_start(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load_from_path(config_path)?;
    println!("PromptGate starting...");
    println!("Config: {}", config_path.display());
    println!("Listen: {}", config.server.listen);

    let audit = if config.audit.enabled {
        Some(AuditLog::open(&db_path(&config))?)
    } else {
        None
    };

    let manager = Arc::new(config.build_manager(Arc::new(RegexDetector::new())));
    println!("Policies loaded: {}", manager.policy_count());

    let state = Arc::new(AppState {
        manager,
        audit,
        http: reqwest::Client::new(),
        upstream: config.upstream.clone(),
        stream: config.stream,
    });

    let server = GateServer::new(config.server.listen.clone(), state);
    let addr = server.start().await?;
    println!("Proxy running on {}", addr);
    println!("Point provider SDK base URLs at http://{}", addr);

    // Keep running until interrupted
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    Ok(())
}

fn cmd_logs(config_path: &Path, tail: usize, export: bool, format: &str) -> anyhow::Result<()> {
    let config = AppConfig::load_from_path(config_path).unwrap_or_default();
    let db = db_path(&config);
    if !db.exists() {
        println!("No audit database found. Run 'promptgate start' first.");
        return Ok(());
    }

    let pool = audit::open_pool(&db)?;
    let conn = pool.get().map_err(|e| anyhow::anyhow!(e))?;

    if export {
        match format {
            "csv" => {
                let csv = audit::export::export_csv(&conn)?;
                print!("{}", csv);
            }
            _ => {
                let json = audit::export::export_json(&conn)?;
                println!("{}", json);
            }
        }
    } else {
        let records = audit::query_recent(&conn, tail)?;
        if records.is_empty() {
            println!("No decision records found.");
        } else {
            println!(
                "{:<25} {:<10} {:<16} {:<16} {:<8} {}",
                "TIMESTAMP", "VERDICT", "CHECKPOINT", "CORRELATION", "POLICY", "DETAILS"
            );
            println!("{}", "─".repeat(110));
            for record in &records {
                println!(
                    "{:<25} {:<10} {:<16} {:<16} {:<8} {}",
                    record.timestamp,
                    record.verdict,
                    record.checkpoint,
                    record.correlation_id,
                    record.policy_name,
                    record.details
                );
            }
        }
    }
    Ok(())
}

fn cmd_init(config_path: &Path) -> anyhow::Result<()> {
    println!("Initializing PromptGate...");

    let data = data_dir();
    println!("  Created data dir: {}", data.display());

    if !config_path.exists() {
        let default_config = include_str!("../templates/default.toml");
        std::fs::write(config_path, default_config)?;
        println!("  Created config: {}", config_path.display());
    } else {
        println!("  Config already exists: {}", config_path.display());
    }

    println!("\nDone! Next steps:");
    println!("  1. Edit policies in {}", config_path.display());
    println!("  2. Start the proxy: promptgate start");
    println!("  3. Point your SDK base URL at the proxy address");
    Ok(())
}
