use std::sync::Arc;

use tracing::{error, info};

use chatrelay::file::{AttachmentCodec, FileStorage};
use chatrelay::{Config, Database, SessionCoordinator, WebServer};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = chatrelay::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        chatrelay::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!("Chat relay stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> chatrelay::Result<()> {
    info!("Chatrelay - room-based chat relay");

    let db = Database::open(&config.database.path).await?;
    db.reset_live_state().await?;

    let storage = FileStorage::new(&config.files.folder)?;
    info!("Attachments stored in {:?}", storage.base_path());
    let codec = AttachmentCodec::new(storage, config.files.max_files);

    let coordinator = Arc::new(SessionCoordinator::new(db, codec, config.chat.clone()));
    WebServer::new(&config.server, coordinator)?.run().await
}
