use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:5001")]
    pub server_addr: String,

    /// Directory of the built front-end to serve. Unknown paths fall back to its index.html.
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Maximum send-chat requests accepted per second, across all clients.
    #[arg(long, env = "CHAT_RATE_LIMIT", default_value = "10")]
    pub chat_rate_limit: u32,

    // --- History Store Args ---
    /// JSON file holding the chat transcript.
    #[arg(long, env = "CHAT_HISTORY_FILE", default_value = "chat_history.json")]
    pub history_file: PathBuf,

    /// Number of most recent transcript turns handed to the provider as context.
    #[arg(long, env = "HISTORY_CONTEXT_LEN", default_value = "20")]
    pub history_context_len: usize,

    // --- Chat Provider Args ---
    /// Provider used when a request names none (gemini, openrouter, pinecone).
    #[arg(long, env = "DEFAULT_CHAT_PROVIDER", default_value = "gemini")]
    pub default_provider: String,

    /// Upper bound in seconds for a single upstream provider call.
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value = "60")]
    pub provider_timeout_secs: u64,

    /// API key for Gemini. Leaving it unset disables the provider.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model name (e.g., gemini-2.5-flash)
    #[arg(long, env = "GEMINI_MODEL")] // No default, rely on adapter defaults if None
    pub gemini_model: Option<String>,

    /// Gemini API base URL (e.g., https://generativelanguage.googleapis.com/v1beta)
    #[arg(long, env = "GEMINI_BASE_URL")]
    pub gemini_base_url: Option<String>,

    /// API key for OpenRouter. Leaving it unset disables the provider.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub openrouter_api_key: Option<String>,

    /// OpenRouter model name (e.g., deepseek/deepseek-chat)
    #[arg(long, env = "OPENROUTER_MODEL")]
    pub openrouter_model: Option<String>,

    /// OpenRouter API base URL (e.g., https://openrouter.ai/api/v1)
    #[arg(long, env = "OPENROUTER_BASE_URL")]
    pub openrouter_base_url: Option<String>,

    /// Application name sent to OpenRouter in the X-Title header.
    #[arg(long, env = "OPENROUTER_APP_TITLE")]
    pub openrouter_app_title: Option<String>,

    /// API key for the Pinecone assistant. Requires --assistant-name.
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub pinecone_api_key: Option<String>,

    /// Name of the Pinecone assistant answering chat requests.
    #[arg(long, env = "ASSISTANT_NAME")]
    pub assistant_name: Option<String>,

    /// Pinecone assistant data-plane host.
    #[arg(long, env = "PINECONE_ASSISTANT_HOST")]
    pub pinecone_assistant_host: Option<String>,

    // --- Wiki Args ---
    /// Host of the Pinecone index holding wiki pages, e.g. https://company-wiki-abc123.svc.pinecone.io.
    /// Uses PINECONE_API_KEY. Without it the wiki endpoints answer 503.
    #[arg(long, env = "PINECONE_INDEX_HOST")]
    pub pinecone_index_host: Option<String>,

    /// Vector dimension of the wiki index.
    #[arg(long, env = "WIKI_EMBEDDING_DIMENSION", default_value = "10")]
    pub wiki_embedding_dimension: usize,

    // --- Dashboard Args ---
    /// OpenWeatherMap API key. Without it the weather endpoint serves mocked readings.
    #[arg(long, env = "OPENWEATHERMAP_API_KEY", hide_env_values = true)]
    pub openweathermap_api_key: Option<String>,

    /// CoinGecko API base URL.
    #[arg(long, env = "COINGECKO_BASE_URL", default_value = "https://api.coingecko.com/api/v3")]
    pub coingecko_base_url: String,

    /// Google OAuth client ID that identity tokens must be issued for.
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,

    // --- TLS Args ---
    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    /// Settings from the environment and defaults, ignoring the command line.
    pub fn defaults() -> Self {
        Args::parse_from(["datanexus-relay"])
    }
}
