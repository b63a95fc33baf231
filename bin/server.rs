// LedgerDesk - Web Server
// REST API over the accounting core with Axum

use anyhow::{Context, Result};
use ledgerdesk::logging::init_logging;
use ledgerdesk::server::{router, AppState};
use ledgerdesk::{open_database, CompletionClient, Config, OpenAiClient};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(config.log_json);

    println!("🌐 LedgerDesk - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_database(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    println!("✓ Database opened: {}", config.database_path.display());

    let completion: Option<Arc<dyn CompletionClient>> = if config.openai.is_configured() {
        let client = OpenAiClient::new(&config.openai)?;
        println!("✓ AI insights enabled ({})", client.model());
        Some(Arc::new(client))
    } else {
        tracing::warn!("OPENAI_API_KEY not set; insight generation is disabled");
        None
    };

    let app = router(AppState::new(conn, completion));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    println!("\n🚀 Server running on http://{}", config.bind_addr);
    println!("   API: http://{}/api/health", config.bind_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
