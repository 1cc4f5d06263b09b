use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use webclaw::agent_engine::engine::Orchestrator;
use webclaw::agent_engine::state::AutomationRequest;
use webclaw::browser::page::CdpPage;
use webclaw::config::{load_config_from, load_config_or_default};
use webclaw::errors::WebClawResult;
use webclaw::llm::registry::ProviderRegistry;
use webclaw::session::analyzer::RecordedSession;

#[derive(Parser)]
#[command(name = "webclaw")]
#[command(version)]
#[command(about = "Drive a Chrome tab from a natural-language task", long_about = None)]
struct Cli {
    /// What the agent should accomplish
    intent: String,

    /// Page to open before the first planned step
    #[arg(long, value_name = "URL")]
    start_url: Option<String>,

    /// Expected outcome; prefix with `url:` to match the final URL
    #[arg(long, value_name = "TEXT")]
    expect: Option<String>,

    /// Extra instruction for the planner (repeatable)
    #[arg(long, value_name = "TEXT")]
    constraint: Vec<String>,

    /// Recorded session (JSON) to learn selectors from
    #[arg(long, value_name = "PATH")]
    session: Option<PathBuf>,

    /// CDP endpoint: `ws://` page URL or `http://host:port`
    #[arg(long, value_name = "URL")]
    cdp_url: Option<String>,

    /// Path to config.toml
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> WebClawResult<()> {
    let _ = dotenvy::dotenv();
    webclaw::init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config_or_default(),
    };
    let endpoint = cli.cdp_url.clone().unwrap_or_else(|| config.browser.cdp_endpoint.clone());
    let page = CdpPage::connect(&endpoint, Duration::from_millis(config.browser.command_timeout_ms)).await?;
    tracing::info!(endpoint = %endpoint, "attached to browser");

    let providers = Arc::new(ProviderRegistry::from_config(&config));
    let orchestrator = Arc::new(Orchestrator::from_config(&config, Arc::new(page), providers)?);

    let mut events = orchestrator.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => eprintln!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "unprintable event"),
                },
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let canceller = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let mut request = AutomationRequest::new(cli.intent);
    request.start_url = cli.start_url;
    request.expected_outcome = cli.expect;
    request.constraints = cli.constraint;
    if let Some(path) = &cli.session {
        let session: RecordedSession = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        request.recorded_session = Some(session);
    }

    let result = orchestrator.execute_automation(request).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
