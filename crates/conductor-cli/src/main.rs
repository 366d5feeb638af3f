mod clock;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use conductor_config::{find_config_path, load_config, resolve_path, save_config, StorageBackend};
use conductor_core::session::SessionParts;
use conductor_core::{
    Agent, AgentOptions, InMemoryStorage, JsonFileMemory, LanguageModel, ModelPool, ResponseKind,
    RigModel, Role, Session, SessionMeta, SqliteStorage, Storage,
};
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, ollama, openai, openrouter};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio_util::sync::CancellationToken;

/// Render markdown text to the terminal using termimad.
fn render_markdown(text: &str) {
    let skin = termimad::MadSkin::default();
    skin.print_text(text);
}

/// Print a status line dimmed.
fn print_status(text: &str) {
    println!("\x1b[2m  {text}\x1b[0m");
}

#[derive(Parser)]
#[command(name = "conductor", about = "Skill-orchestrating LLM agent", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Single message mode (non-interactive)
        #[arg(short, long)]
        message: Option<String>,

        /// Customer id used for stored history
        #[arg(long, default_value = "cli")]
        customer: String,
    },
    /// Initialize configuration
    Onboard {
        /// Skip interactive prompts and write defaults
        #[arg(long)]
        non_interactive: bool,
    },
    /// Show configuration summary
    Status,
    /// Print stored conversations
    History {
        /// Customer id to read history for
        #[arg(long, default_value = "cli")]
        customer: String,

        /// Number of most recent conversations
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Inspect or edit the memory file
    Memory {
        #[command(subcommand)]
        action: MemoryCommands,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Print the memory as the agent sees it
    Show,
    /// Store a value
    Set { key: String, value: String },
    /// Remove a key
    Forget { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = format!("{base_filter},conductor_core=debug");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard { non_interactive } => run_onboard(cli.config, non_interactive),
        Commands::Status => {
            let config_path = cli.config.unwrap_or_else(find_config_path);
            run_status(&config_path)
        }
        Commands::History { customer, limit } => {
            let config_path = cli.config.unwrap_or_else(find_config_path);
            let config = load_config(&config_path)?;
            run_history(&config, &customer, limit).await
        }
        Commands::Memory { action } => {
            let config_path = cli.config.unwrap_or_else(find_config_path);
            let config = load_config(&config_path)?;
            run_memory_command(action, &config)
        }
        Commands::Chat { message, customer } => {
            let config_path = cli.config.unwrap_or_else(find_config_path);
            let config = load_config(&config_path)?;
            let parts = build_session_parts(&config)?;

            if let Some(msg) = message {
                run_single_message(&parts, &customer, &msg).await
            } else {
                run_interactive(&parts, &customer).await
            }
        }
    }
}

/// Resolve an API key from config, falling back to an environment variable.
fn resolve_api_key(
    provider_cfg: &Option<conductor_config::ProviderConfig>,
    env_var: &str,
) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

/// Custom API base for a provider, if one is set.
fn resolve_api_base(provider_cfg: &Option<conductor_config::ProviderConfig>) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_base.clone())
        .filter(|b| !b.is_empty())
}

/// Create a completion model for a specific provider + model combination.
///
/// Errors clearly if provider is unknown or has no API key.
#[allow(deprecated)]
fn create_model_for(
    provider: &str,
    model_name: &str,
    config: &conductor_config::Config,
) -> Result<CompletionModelHandle<'static>> {
    if model_name.is_empty() {
        anyhow::bail!("No model configured for provider '{provider}'.");
    }

    match provider {
        "anthropic" => {
            let key = resolve_api_key(&config.providers.anthropic, "ANTHROPIC_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Anthropic provider selected but no API key found. \
                     Set providers.anthropic.apiKey in config.json or ANTHROPIC_API_KEY env var."
                    )
                })?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Anthropic client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Anthropic provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "openai" => {
            let key =
                resolve_api_key(&config.providers.openai, "OPENAI_API_KEY").ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenAI provider selected but no API key found. \
                     Set providers.openai.apiKey in config.json or OPENAI_API_KEY env var."
                    )
                })?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = resolve_api_base(&config.providers.openai) {
                builder = builder.base_url(base);
                tracing::info!("Using OpenAI provider with custom base: {base}");
            }
            let client: openai::CompletionsClient = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using OpenAI provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "ollama" => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = resolve_api_base(&config.providers.ollama) {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Ollama client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Ollama provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "openrouter" => {
            let key = resolve_api_key(&config.providers.openrouter, "OPENROUTER_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenRouter provider selected but no API key found. \
                     Set providers.openrouter.apiKey in config.json or OPENROUTER_API_KEY env var."
                    )
                })?;
            let client: openrouter::Client = openrouter::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create OpenRouter client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using OpenRouter provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "" => anyhow::bail!(
            "No provider configured.\n\
             Valid providers: anthropic, openai, ollama, openrouter"
        ),

        other => anyhow::bail!(
            "Unknown provider '{other}'. \
             Valid providers: anthropic, openai, ollama, openrouter"
        ),
    }
}

/// Build a ModelPool from `agents.models`.
#[allow(deprecated)]
fn create_model_pool(config: &conductor_config::Config) -> Result<ModelPool> {
    if !config.agents.models.contains_key("default") {
        anyhow::bail!(
            "No models configured. Set agents.models in config.json with at least a \"default\" entry.\n\
             Example:\n  \
             \"models\": {{ \"default\": {{ \"provider\": \"ollama\", \"model\": \"llama3\" }} }}"
        );
    }

    let mut models = HashMap::new();
    for (tier, model_ref) in &config.agents.models {
        let handle = create_model_for(&model_ref.provider, &model_ref.model, config)
            .map_err(|e| anyhow::anyhow!("Failed to create model for tier '{tier}': {e}"))?;
        tracing::info!(
            "Model tier '{tier}': {} / {}",
            model_ref.provider,
            model_ref.model
        );
        models.insert(tier.clone(), (handle, model_ref.model.clone()));
    }

    ModelPool::new(models)
}

fn create_storage(config: &conductor_config::Config) -> Result<Arc<dyn Storage>> {
    Ok(match config.storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryStorage::new()),
        StorageBackend::Sqlite => {
            let path = resolve_path(&config.storage.path);
            tracing::debug!("Using SQLite storage at {}", path.display());
            Arc::new(SqliteStorage::new(&path)?)
        }
    })
}

/// Wire the agent, model, memory and storage from config.
fn build_session_parts(config: &conductor_config::Config) -> Result<SessionParts> {
    let pool = create_model_pool(config)?;
    let model: Arc<dyn LanguageModel> = Arc::new(RigModel::new(
        pool,
        f64::from(config.agents.temperature),
        u64::from(config.agents.max_tokens),
    ));

    let agent = Agent::new(
        config.agents.prompt.clone(),
        vec![clock::skill()],
        AgentOptions::from_config(&config.agents),
    )?;

    Ok(SessionParts {
        agent: Arc::new(agent),
        model,
        memory: Arc::new(JsonFileMemory::new(resolve_path(&config.memory.path))),
        storage: create_storage(config)?,
        history_window: config.agents.history_window,
    })
}

/// Run one message through a fresh session and print its responses.
///
/// Ctrl-C closes the session; the run still ends cleanly.
async fn chat_once(parts: &SessionParts, customer: &str, message: &str) -> Result<()> {
    let shutdown = CancellationToken::new();
    let session = Session::start(&shutdown, SessionMeta::new(customer), parts.clone());
    session.send(message)?;

    let mut answer = String::new();
    let mut interrupted = false;
    loop {
        let response = tokio::select! {
            response = session.next() => response,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                println!("^C");
                session.close();
                continue;
            }
        };
        let Some(response) = response else { break };

        match response.kind {
            ResponseKind::Status => print_status(&response.content),
            ResponseKind::PartialText => answer.push_str(&response.content),
            ResponseKind::Error => eprintln!("Error: {}", response.content),
            ResponseKind::InputRequest => print_status(&response.content),
            ResponseKind::End => break,
        }
    }

    if !answer.is_empty() {
        println!();
        render_markdown(&answer);
        println!();
    }
    Ok(())
}

async fn run_single_message(parts: &SessionParts, customer: &str, message: &str) -> Result<()> {
    chat_once(parts, customer, message).await
}

async fn run_interactive(parts: &SessionParts, customer: &str) -> Result<()> {
    let history_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".conductor")
        .join("history");
    std::fs::create_dir_all(&history_dir)?;
    let history_path = history_dir.join("cli_history");

    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    println!("conductor interactive mode (type /help for commands, Ctrl-D to quit)");
    println!();

    let result = loop {
        let readline = rl.readline("you> ");
        match readline {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(input);

                if matches!(input, "exit" | "quit" | "/exit" | "/quit" | ":q") {
                    break Ok(());
                }

                if input == "/help" {
                    println!("Commands:");
                    println!("  /help  - Show this help");
                    println!("  /quit  - Exit");
                    println!("  Ctrl-C while the agent runs cancels the run");
                    println!();
                    continue;
                }

                if let Err(e) = chat_once(parts, customer, input).await {
                    eprintln!("Error: {e}");
                    println!();
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break Ok(());
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break Ok(());
            }
        }
    };

    let _ = rl.save_history(&history_path);
    result
}

async fn run_history(config: &conductor_config::Config, customer: &str, limit: usize) -> Result<()> {
    let storage = create_storage(config)?;
    let meta = SessionMeta::new(customer);
    let history = storage.get_conversations(&meta, limit, 0).await?;

    if history.is_empty() {
        println!("No stored conversations for '{customer}'.");
        return Ok(());
    }
    for message in history.iter() {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "agent",
            _ => continue,
        };
        println!("{who}> {}", message.content);
    }
    Ok(())
}

fn run_memory_command(action: MemoryCommands, config: &conductor_config::Config) -> Result<()> {
    let memory = JsonFileMemory::new(resolve_path(&config.memory.path));
    let block = memory.load()?;

    match action {
        MemoryCommands::Show => {
            if block.is_empty() {
                println!("Memory is empty ({}).", memory.path().display());
            } else {
                print!("{}", block.parse());
            }
        }
        MemoryCommands::Set { key, value } => {
            block.add_string(key.clone(), value);
            memory.save(&block)?;
            println!("Stored '{key}'.");
        }
        MemoryCommands::Forget { key } => {
            if block.delete(&key) {
                memory.save(&block)?;
                println!("Removed '{key}'.");
            } else {
                println!("No memory entry named '{key}'.");
            }
        }
    }
    Ok(())
}

fn prompt_with_default(prompt: &str, default: &str) -> Result<String> {
    use std::io::{self, Write};
    print!("{prompt} [{default}]: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Write a starter config.
fn run_onboard(config_arg: Option<PathBuf>, non_interactive: bool) -> Result<()> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let config_path = config_arg.unwrap_or_else(|| home.join(".conductor").join("config.json"));

    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        println!("To reset, delete it and run `conductor onboard` again.");
        return Ok(());
    }

    let mut cfg = conductor_config::Config::default();
    let mut default_model = conductor_config::ModelRef {
        provider: "ollama".into(),
        model: "llama3.1".into(),
    };
    if !non_interactive {
        println!("Interactive setup");
        default_model.provider = prompt_with_default(
            "Provider (anthropic/openai/ollama/openrouter)",
            &default_model.provider,
        )?;
        default_model.model = prompt_with_default("Default model", &default_model.model)?;
        cfg.agents.prompt = prompt_with_default("Agent prompt", &cfg.agents.prompt)?;
        let backend = prompt_with_default("Storage backend (sqlite/memory)", "sqlite")?;
        cfg.storage.backend = match backend.to_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::Sqlite,
        };
    }
    cfg.agents.models.insert("default".into(), default_model);

    save_config(&config_path, &cfg)?;
    println!("Created config: {}", config_path.display());
    println!();
    println!("Setup complete! Next steps:");
    println!(
        "  1. Edit {} to configure your LLM provider",
        config_path.display()
    );
    println!("  2. Run `conductor chat` to start chatting");
    println!();
    Ok(())
}

/// Show configuration summary.
fn run_status(config_path: &Path) -> Result<()> {
    println!("conductor status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
    } else {
        println!(
            "  Config:    {} (not found, run `conductor onboard`)",
            config_path.display()
        );
        return Ok(());
    }

    let config = load_config(config_path)?;
    let agents = &config.agents;

    let mut tiers: Vec<_> = agents.models.iter().collect();
    tiers.sort_by(|a, b| a.0.cmp(b.0));
    if tiers.is_empty() {
        println!("  Models:    (not set)");
    } else {
        println!("  Models:");
        for (tier, model_ref) in tiers {
            println!("    {tier}: {} / {}", model_ref.provider, model_ref.model);
        }
    }
    println!(
        "  Tiers:     decision={} skill={} synthesis={}",
        agents.tiers.decision, agents.tiers.skill, agents.tiers.synthesis
    );
    println!(
        "  Limits:    {} decision rounds, {} skill rounds, tool timeout {}",
        agents.max_iterations,
        agents.max_skill_iterations,
        if agents.tool_timeout_secs == 0 {
            "off".to_string()
        } else {
            format!("{}s", agents.tool_timeout_secs)
        }
    );
    println!("  History:   last {} conversations", agents.history_window);
    println!();

    match config.storage.backend {
        StorageBackend::Memory => println!("  Storage:   in-memory"),
        StorageBackend::Sqlite => {
            let path = resolve_path(&config.storage.path);
            println!(
                "  Storage:   sqlite {} ({})",
                path.display(),
                if path.exists() { "found" } else { "not created yet" }
            );
        }
    }
    let memory_path = resolve_path(&config.memory.path);
    println!(
        "  Memory:    {} ({})",
        memory_path.display(),
        if memory_path.exists() { "found" } else { "empty" }
    );
    println!();

    Ok(())
}
