use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use storystudio::core::config::{Config, CONFIG_FILE};
use storystudio::core::credentials::CredentialManager;
use storystudio::core::io::{NativeStorage, Storage};
use storystudio::services::console::Console;
use storystudio::services::failover::ResilientCaller;
use storystudio::services::gemini::GeminiClient;
use storystudio::services::studio::StudioService;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load or create config
    let config = match Config::load_or_default(Path::new(CONFIG_FILE)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please fix or remove '{}'.", CONFIG_FILE);
            return Err(e);
        }
    };
    config.ensure_directories()?;

    // 2. Storage and API keys
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let credentials = CredentialManager::load(&config.data_folder, storage.clone()).await?;
    if credentials.is_empty() {
        println!("No API keys yet, add one under 'Manage API keys'.");
    }

    // 3. Gemini client behind key failover
    let client = Arc::new(GeminiClient::new(config.gemini.clone()));
    let studio = StudioService::new(
        ResilientCaller::new(credentials),
        client,
        config.narration_language(),
    );

    // 4. Interactive menu
    let console = Console::new(config, storage, studio);
    console.run().await?;

    Ok(())
}
