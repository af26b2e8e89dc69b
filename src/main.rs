use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use perry::agents::{EchoAgent, SubquestionAgent};
use perry::providers::OpenAIProvider;
use perry::storage::{PersistenceGateway, PostgresGateway};
use perry::{Agent, AgentCache, AgentId, AgentTypeRegistry, Config, ConversationId};

#[derive(Parser)]
#[command(name = "perry")]
#[command(about = "Agent lifecycle manager for document Q&A", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered agent types
    Types,
    /// Print the settings schema of an agent type
    Schema {
        #[arg(help = "Agent type name")]
        type_name: String,
    },
    /// Create the agents table if it does not exist
    Migrate,
    /// Create and save a new agent
    Create {
        #[arg(long = "type")]
        type_name: String,
        #[arg(long, help = "Agent settings as a JSON object")]
        config: String,
        #[arg(long)]
        conversation: Option<ConversationId>,
    },
    /// Ask a saved agent a question
    Query {
        #[arg(long)]
        agent: AgentId,
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("perry=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let registry = Arc::new(build_registry(&config));

    match cli.command {
        Commands::Types => {
            for name in registry.list_types() {
                println!("{}", name);
            }
        }
        Commands::Schema { type_name } => {
            let schema = registry.settings_schema(&type_name)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Commands::Migrate => {
            connect(&config).await?.run_migrations().await?;
            println!("Migrations applied");
        }
        Commands::Create {
            type_name,
            config: raw,
            conversation,
        } => {
            let settings: serde_json::Value =
                serde_json::from_str(&raw).context("--config is not valid JSON")?;
            let gateway = Arc::new(connect(&config).await?);
            let id = create_agent(&registry, gateway, &type_name, &settings, conversation).await?;
            println!("Created agent {}", id);
        }
        Commands::Query { agent, text } => {
            let gateway = Arc::new(connect(&config).await?);
            let cache = AgentCache::new(registry.clone(), gateway, config.cache_config());
            let agent = cache.get_or_load(agent).await?;
            println!("{}", agent.query(&text).await?);
        }
    }

    Ok(())
}

fn build_registry(config: &Config) -> AgentTypeRegistry {
    let registry = AgentTypeRegistry::new();
    registry.register(EchoAgent::TYPE_NAME, EchoAgent);

    if let Some(api_key) = &config.openai_api_key {
        let provider = Arc::new(OpenAIProvider::new(api_key.clone()));
        registry.register(SubquestionAgent::TYPE_NAME, SubquestionAgent::new(provider));
    } else {
        log::debug!("OPENAI_API_KEY not set, {} unavailable", SubquestionAgent::TYPE_NAME);
    }

    registry
}

async fn connect(config: &Config) -> Result<PostgresGateway> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;
    PostgresGateway::new(url).await
}

async fn create_agent(
    registry: &AgentTypeRegistry,
    gateway: Arc<PostgresGateway>,
    type_name: &str,
    settings: &serde_json::Value,
    conversation: Option<ConversationId>,
) -> Result<AgentId> {
    // Reject bad input before a row is written.
    let canonical = registry.validate_config(type_name, settings)?;
    let id = gateway.create_agent(conversation).await?;

    if conversation.is_some() {
        let agent = Agent::construct(registry, type_name, &canonical, id, gateway).await?;
        agent.save().await?;
    } else {
        // Unconnected agents cannot be built yet; store the settings for later.
        gateway.save_agent(id, type_name, &canonical).await?;
        log::info!("agent {} saved without a conversation", id);
    }

    Ok(id)
}
