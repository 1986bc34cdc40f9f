pub mod auth;
pub mod cli;
pub mod dashboard;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod relay;
pub mod server;
pub mod wiki;

#[cfg(test)]
mod test_util;

use cli::Args;
use history::initialize_history_store;
use llm::chat::ProviderRegistry;
use llm::{ ProviderConfig, ProviderType };
use log::{ info, warn };
use relay::ChatRelay;
use server::{ AppState, Server };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let default_provider: ProviderType = args.default_provider.parse()?;
    let configs: Vec<ProviderConfig> = ProviderType::ALL.into_iter()
        .map(|provider| ProviderConfig::from_args(provider, &args))
        .collect();
    let providers = ProviderRegistry::from_configs(&configs);

    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("History File: {}", args.history_file.display());
    info!("History Context Turns: {}", args.history_context_len);
    info!("Default Chat Provider: {}", default_provider);
    for provider in ProviderType::ALL {
        let status = if providers.get(provider).is_some() { "enabled" } else { "disabled" };
        info!("Provider {}: {}", provider, status);
    }
    info!("Chat Rate Limit: {}/s", args.chat_rate_limit);
    info!("Wiki Index: {}", args.pinecone_index_host.as_deref().unwrap_or("disabled"));
    info!("Weather API: {}", if args.openweathermap_api_key.is_some() { "live" } else { "mocked" });
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    if providers.get(default_provider).is_none() {
        warn!("Default provider {} is not configured; chats without a provider tag will fail.", default_provider);
    }

    let history = initialize_history_store(&args);
    let relay = Arc::new(
        ChatRelay::new(history, providers, default_provider, args.history_context_len)
    );
    let state = AppState::new(relay, &args)?;

    Server::new(&args, state)?.run().await
}
