use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use console::style;
use serde_json::json;
use strum::IntoEnumIterator;
use tracing_subscriber::EnvFilter;

use reagent::agent::Agent;
use reagent::errors::{AgentError, ToolError, ToolResult};
use reagent::models::message::Message;
use reagent::models::tool::ToolDefinition;
use reagent::plugins::Plugin;
use reagent::providers::factory::{self, ProviderType};
use reagent::registry::{ToolRegistry, CORE_CATEGORY};
use reagent::settings::Settings;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML settings file; REAGENT_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one turn of the agent and print its answer
    Run {
        /// The user message
        #[arg(required = true)]
        message: Vec<String>,

        #[arg(short, long, default_value = "You are a helpful assistant.")]
        system: String,

        /// Model to use instead of the configured one
        #[arg(short, long)]
        model: Option<String>,

        /// Let the provider use its hosted web search tool
        #[arg(long)]
        web_search: bool,
    },
    /// List the supported provider types
    Providers,
}

/// Counts words, so there is always at least one tool to call
struct WordCountPlugin;

#[async_trait]
impl Plugin for WordCountPlugin {
    async fn execute(&self, tool_name: &str, arguments: &str) -> ToolResult<String> {
        let args: serde_json::Value = serde_json::from_str(arguments)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        match tool_name {
            "count_words" => {
                let text = args
                    .get("text")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::InvalidParameters("missing 'text'".into()))?;
                Ok(json!({ "count": text.split_whitespace().count() }).to_string())
            }
            other => Err(ToolError::ToolNotFound(other.to_string())),
        }
    }
}

fn builtin_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register_plugin(
        "builtin",
        CORE_CATEGORY,
        vec![ToolDefinition::new(
            "count_words",
            "Count the number of words in text",
            json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The text to count words in"
                    }
                },
                "required": ["text"]
            }),
        )],
        Arc::new(WordCountPlugin),
    );
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Providers => {
            for provider_type in ProviderType::iter() {
                println!("{}", provider_type);
            }
            Ok(())
        }
        Command::Run {
            message,
            system,
            model,
            web_search,
        } => run(cli.config, message.join(" "), system, model, web_search).await,
    }
}

async fn run(
    config: Option<PathBuf>,
    message: String,
    system: String,
    model: Option<String>,
    web_search: bool,
) -> Result<()> {
    let settings = Settings::load(config.as_deref()).context("failed to load settings")?;
    let model = model.unwrap_or_else(|| settings.provider.model().to_string());
    let mut agent_settings = settings.agent_settings();
    agent_settings.enable_web_search |= web_search;

    let provider = factory::get_provider(settings.provider_config())?;
    let mut agent = Agent::new(
        Arc::from(provider),
        Arc::new(builtin_registry()),
        agent_settings,
    );

    // Ctrl+C cancels the running turn from the signal thread
    let handle = agent.handle();
    ctrlc::set_handler(move || handle.cancel()).context("failed to install Ctrl+C handler")?;

    eprintln!(
        "{} {}",
        style(settings.provider.provider_type()).cyan(),
        style(&model).dim()
    );

    match agent.execute(Message::user().with_text(message), &system, &model).await {
        Ok(answer) => {
            println!("{}", answer);
            let usage = agent.total_usage();
            eprintln!(
                "{}",
                style(format!(
                    "tokens: {} in, {} out",
                    usage.input_tokens.unwrap_or(0),
                    usage.output_tokens.unwrap_or(0)
                ))
                .dim()
            );
            Ok(())
        }
        Err(AgentError::Cancelled) => {
            eprintln!("{}", style("cancelled").yellow());
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
