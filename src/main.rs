use agrigate::{config::ServerConfig, context::AppContext, error::ApiResult, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ApiResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agrigate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ___             _             __
   /   | ____ _____(_)___ _____ _/ /____
  / /| |/ __ `/ ___/ / __ `/ __ `/ __/ _ \
 / ___ / /_/ / /  / / /_/ / /_/ / /_/  __/
/_/  |_\__, /_/  /_/\__, /\__,_/\__/\___/
      /____/       /____/

        Agricultural Advisory API v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
