use anyhow::Result;

use storefront::App;
use storefront_session::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("\nCreate a config.toml (or set STOREFRONT_CONFIG) with for example:");
        eprintln!("\n[api]");
        eprintln!("base_url = \"http://localhost:8080/api\"");
        eprintln!("\n[realtime]");
        eprintln!("url = \"ws://localhost:8080/ws/websocket\"");
        e
    })?;

    // Logging is initialized in App::run()
    App::new(settings).run().await?;

    Ok(())
}
