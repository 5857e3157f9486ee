use clap::{Parser, Subcommand};
use lib::config::{self, BridgeConfig};
use lib::supervisor::Supervisor;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tg-bridge")]
#[command(about = "Relay every new post from one Telegram channel to another", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the bridge under the restart supervisor (default). Needs TG_STRING_SESSION.
    Run {
        /// Config file path (default: TG_BRIDGE_CONFIG_PATH or ~/.tg-bridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Log in to a user account interactively and print a string session for TG_STRING_SESSION.
    Session {
        /// Config file path (default: TG_BRIDGE_CONFIG_PATH or ~/.tg-bridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the resolved configuration (secrets masked) and whether it is runnable.
    CheckConfig {
        /// Config file path (default: TG_BRIDGE_CONFIG_PATH or ~/.tg-bridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command.unwrap_or(Commands::Run { config: None }) {
        Commands::Version => {
            println!("tg-bridge {}", env!("CARGO_PKG_VERSION"));
            0
        }
        Commands::Run { config } => run_bridge(config).await,
        Commands::Session { config } => match run_session(config).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("❌ Error: {:#}", e);
                1
            }
        },
        Commands::CheckConfig { config } => match run_check_config(config) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("❌ Error: {:#}", e);
                1
            }
        },
    };
    std::process::exit(code);
}

async fn run_bridge(config_path: Option<PathBuf>) -> i32 {
    let config = match config::load_config(config_path) {
        Ok((config, path)) => {
            lib::logging::init(Some(config.log_file.as_path()));
            log::debug!("loaded config from {}", path.display());
            config
        }
        Err(e) => {
            lib::logging::init(None);
            log::error!("❌ Configuration error: {:#}", e);
            return 1;
        }
    };

    let supervisor = Supervisor::new(config, config::resolve_session(), lib::client::build_client);
    let exit = supervisor.run().await;
    log::info!("exiting with status {}", exit.code());
    exit.code()
}

fn run_check_config(config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let (config, path) = config::load_config(config_path)?;
    println!("config file: {}", path.display());

    let mut shown = serde_json::to_value(&config)?;
    if let Some(obj) = shown.as_object_mut() {
        obj.insert(
            "apiHash".to_string(),
            serde_json::Value::String(config::mask_secret(&config.api_hash)),
        );
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);

    let session = config::resolve_session();
    match &session {
        Some(s) => println!("{}: present ({})", config::SESSION_ENV, config::mask_secret(s)),
        None => println!("{}: missing", config::SESSION_ENV),
    }
    match BridgeConfig::from_config(&config, session) {
        Ok(_) => {
            println!("✅ configuration is valid");
            Ok(0)
        }
        Err(e) => {
            println!("❌ {}", e);
            Ok(1)
        }
    }
}

#[cfg(feature = "mtproto")]
async fn run_session(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    use lib::client::login_interactive;

    let (cfg, _) = config::load_config(config_path)?;
    let (api_id, api_hash) = api_credentials(&cfg)?;

    println!("🔐 Logging in to Telegram to generate a string session");
    let mut prompt = StdinPrompt;
    let summary = login_interactive(api_id, &api_hash, &mut prompt).await?;

    println!();
    println!("✅ Login successful!");
    println!();
    println!("📋 Your string session (keep it secret):");
    println!();
    println!("{}", summary.session);
    println!();
    println!("📝 Set it in the environment before running the bridge:");
    println!("   export {}=\"<the string above>\"", config::SESSION_ENV);
    println!("   and set \"transport\": \"mtproto\" in the config file");
    println!();
    println!("👤 Account:");
    println!("   id: {}", summary.user_id);
    println!("   name: {}", summary.first_name);
    if let Some(username) = &summary.username {
        println!("   username: @{}", username);
    }
    if let Some(phone) = &summary.phone {
        println!("   phone: {}", phone);
    }
    Ok(())
}

#[cfg(not(feature = "mtproto"))]
async fn run_session(_config_path: Option<PathBuf>) -> anyhow::Result<()> {
    anyhow::bail!("the session command requires building with --features mtproto")
}

/// Use API credentials from config unless they are still the shipped placeholders.
#[cfg(feature = "mtproto")]
fn api_credentials(cfg: &config::Config) -> anyhow::Result<(i32, String)> {
    let defaults = config::Config::default();
    let api_id = if cfg.api_id == defaults.api_id {
        read_line("API ID: ")?
            .parse()
            .map_err(|_| anyhow::anyhow!("API ID must be a number"))?
    } else {
        cfg.api_id
    };
    let api_hash = if cfg.api_hash == defaults.api_hash {
        read_line("API Hash: ")?
    } else {
        cfg.api_hash.clone()
    };
    Ok((api_id, api_hash))
}

#[cfg(feature = "mtproto")]
fn read_line(label: &str) -> std::io::Result<String> {
    use std::io::{self, BufRead, Write};

    let mut stdout = io::stdout();
    write!(stdout, "{}", label)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(feature = "mtproto")]
struct StdinPrompt;

#[cfg(feature = "mtproto")]
impl lib::client::LoginPrompt for StdinPrompt {
    fn phone(&mut self) -> std::io::Result<String> {
        read_line("📱 Phone number (international format, e.g. +15551234567): ")
    }

    fn code(&mut self) -> std::io::Result<String> {
        read_line("🔑 Login code: ")
    }

    fn password(&mut self, hint: Option<&str>) -> std::io::Result<String> {
        match hint {
            Some(h) => read_line(&format!("🔒 2FA password (hint: {}): ", h)),
            None => read_line("🔒 2FA password: "),
        }
    }
}
