use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

use colosseum::a2a::A2AClient;
use colosseum::agent::AgentApp;
use colosseum::battle::start::parse_task_config;
use colosseum::battle::BattleStart;
use colosseum::supervisor::{self, ReadyNotifier, Supervisor, SupervisorConfig};
use colosseum::types::{Participant, Role};
use colosseum::Config;

#[derive(Parser)]
#[command(name = "colosseum")]
#[command(about = "Supervised A2A agents and battle orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file; defaults plus COLOSSEUM_* overrides when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise an agent process and serve the control endpoint
    Launch {
        #[arg(long)]
        control_host: Option<String>,
        #[arg(long)]
        control_port: Option<u16>,
    },
    /// Serve an agent over A2A
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, value_parser = parse_role)]
        role: Option<Role>,
    },
    /// Send a battle_start to a green agent and print its reply
    Kickoff {
        /// Green agent URL
        #[arg(long)]
        green: String,
        /// Participant URLs, assigned white, red, blue in order
        #[arg(long = "participant", required = true)]
        participants: Vec<String>,
        #[arg(long)]
        battle_id: Option<String>,
        /// JSON object or "Task description: {...}"
        #[arg(long)]
        task_config: Option<String>,
        #[arg(long)]
        backend: Option<String>,
    },
    /// Show the supervised agent's status
    Status {
        /// Control endpoint; defaults to [launcher] host and port
        #[arg(long)]
        control: Option<String>,
    },
    /// Restart the supervised agent and wait until it is ready
    Reset {
        #[arg(long)]
        control: Option<String>,
        #[arg(long)]
        notify_url: Option<String>,
        #[arg(long)]
        agent_id: Option<String>,
    },
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::from_str(s).ok_or_else(|| format!("unknown role '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    init_logging(&config.logging.level);

    match cli.command {
        Commands::Launch {
            control_host,
            control_port,
        } => launch(config, cli.config, control_host, control_port).await?,
        Commands::Serve { host, port, role } => serve(config, host, port, role).await?,
        Commands::Kickoff {
            green,
            participants,
            battle_id,
            task_config,
            backend,
        } => kickoff(&config, green, participants, battle_id, task_config, backend).await?,
        Commands::Status { control } => {
            let url = control_url(&config, control);
            let status: Value = reqwest::get(format!("{}/status", url))
                .await
                .with_context(|| format!("Launcher not reachable at {}", url))?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Reset {
            control,
            notify_url,
            agent_id,
        } => {
            let url = control_url(&config, control);
            let response = reqwest::Client::new()
                .post(format!("{}/reset", url))
                .json(&json!({ "notify_url": notify_url, "agent_id": agent_id }))
                .send()
                .await
                .with_context(|| format!("Launcher not reachable at {}", url))?;
            let ok = response.status().is_success();
            let body: Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            if !ok {
                bail!("Reset failed");
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over `[logging] level`.
fn init_logging(level: &str) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

fn control_url(config: &Config, control: Option<String>) -> String {
    control
        .unwrap_or_else(|| format!("http://{}:{}", config.launcher.host, config.launcher.port))
        .trim_end_matches('/')
        .to_string()
}

async fn launch(
    mut config: Config,
    config_path: Option<PathBuf>,
    control_host: Option<String>,
    control_port: Option<u16>,
) -> Result<()> {
    if let Some(host) = control_host {
        config.launcher.host = host;
    }
    if let Some(port) = control_port {
        config.launcher.port = port;
    }
    config.validate()?;

    let mut settings = SupervisorConfig::from_settings(&config)?;
    if config.launcher.command.is_none() {
        if let Some(path) = &config_path {
            settings = settings.with_extra_args(["--config".to_string(), path.display().to_string()]);
        }
    }

    let supervisor = match ReadyNotifier::from_settings(&config) {
        Some(notifier) => Supervisor::with_notifier(settings, notifier),
        None => Supervisor::new(settings),
    };

    let status = supervisor.start().await?;
    log::info!(
        "Supervising agent at {} (pid {:?})",
        status.address.url(),
        status.pid
    );

    let listener = colosseum::api::bind(&config.launcher.host, config.launcher.port).await?;
    let served = colosseum::api::serve(
        supervisor::create_router(supervisor.clone()),
        listener,
        "launcher",
        colosseum::api::shutdown_signal(),
    )
    .await;

    let stopped = supervisor.shutdown().await;
    served?;
    stopped?;
    Ok(())
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>, role: Option<Role>) -> Result<()> {
    if let Some(host) = host {
        config.agent.host = host;
    }
    if let Some(port) = port {
        config.agent.port = port;
    }
    if let Some(role) = role {
        config.agent.role = role;
    }
    config.validate()?;

    let app = AgentApp::build(&config).await?;
    app.serve(&config).await
}

async fn kickoff(
    config: &Config,
    green: String,
    participant_urls: Vec<String>,
    battle_id: Option<String>,
    task_config: Option<String>,
    backend: Option<String>,
) -> Result<()> {
    let client = A2AClient::new(config.a2a.health_check_timeout());

    for url in std::iter::once(&green).chain(participant_urls.iter()) {
        if !client.check_health(url).await {
            bail!("Agent at {} is not reachable", url);
        }
    }

    let roles = Role::participant_order();
    if participant_urls.len() > roles.len() {
        bail!("At most {} participants are supported", roles.len());
    }
    let participants = roles
        .into_iter()
        .zip(participant_urls)
        .map(|(role, url)| Participant::new(role, url))
        .collect();

    let start = BattleStart {
        battle_id: battle_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        participants,
        task_config: parse_task_config(task_config.map(Value::String).as_ref()),
        backend_url: backend.or_else(|| config.backend.url.clone()),
    };
    log::info!("Starting battle {} on {}", start.battle_id, green);

    let reply = client
        .send(
            &green,
            &start.to_message().to_string(),
            Duration::from_secs(config.a2a.message_timeout_secs),
        )
        .await?;
    println!("{}", reply);
    Ok(())
}
