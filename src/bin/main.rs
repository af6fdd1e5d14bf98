use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::info;
use vittcott_backend::{
    arbiter::QuoteArbiter,
    config::QuoteSettings,
    models::{QuoteField, QuoteRequest},
    providers::build_http_client,
};

#[derive(Parser)]
#[command(name = "vittcott", about = "Quote lookups and backend smoke checks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a quote directly through the provider arbiter
    Quote {
        /// Ticker, e.g. MSFT or RELIANCE.NS
        symbol: String,
        /// Include the candle series
        #[arg(long)]
        history: bool,
        /// Include traded volume
        #[arg(long)]
        volume: bool,
        #[arg(long, default_value = "1mo")]
        range: String,
        /// Query both providers at once, keep the first valid answer
        #[arg(long)]
        race: bool,
    },
    /// Check /ai/ask and /api/finance/quote on a running server
    Smoke {
        #[arg(long, env = "VITTCOTT_BACKEND_URL", default_value = "http://localhost:8000")]
        url: String,
        #[arg(long, default_value = "MSFT")]
        symbol: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Quote {
            symbol,
            history,
            volume,
            range,
            race,
        } => run_quote(&symbol, history, volume, &range, race).await,
        Commands::Smoke { url, symbol } => run_smoke(&url, &symbol).await,
    }
}

async fn run_quote(
    symbol: &str,
    history: bool,
    volume: bool,
    range: &str,
    race: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = QuoteSettings::from_env()?;
    settings.race_mode |= race;

    let mut fields = vec![QuoteField::Price];
    if history {
        fields.push(QuoteField::History);
    }
    if volume {
        fields.push(QuoteField::Volume);
    }
    let request = QuoteRequest::new(symbol)?.with_fields(fields).with_range(range)?;

    let arbiter = QuoteArbiter::from_settings(build_http_client()?, &settings);

    info!(symbol = %request.symbol(), race_mode = arbiter.policy().race_mode, "Resolving quote");
    let quote = arbiter.get_quote(&request).await?;

    println!("{}", serde_json::to_string_pretty(&quote)?);
    Ok(())
}

/// Non-destructive checks against a running backend. Exits non-zero when
/// either endpoint does not answer 200.
async fn run_smoke(url: &str, symbol: &str) -> Result<(), Box<dyn std::error::Error>> {
    let base = url.trim_end_matches('/');
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;

    println!("Using backend: {}", base);
    let mut ok = true;

    println!("\n1) AI smoke test: POST /ai/ask (minimal prompt)");
    let started = Instant::now();
    match client
        .post(format!("{}/ai/ask", base))
        .json(&json!({"question": "Say hello briefly"}))
        .send()
        .await
    {
        Ok(response) => {
            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            println!("  Status: {}, latency: {} ms", status.as_u16(), started.elapsed().as_millis());
            if status.is_success() {
                println!("  Response (truncated): {}", summarize(body["answer"].as_str().unwrap_or_default()));
            } else {
                println!("  Error response: {}", summarize(&body.to_string()));
                ok = false;
            }
        }
        Err(e) => {
            println!("  Failed to call AI endpoint: {}", e);
            ok = false;
        }
    }

    println!("\n2) Finance smoke test: GET /api/finance/quote?symbol={}", symbol);
    let started = Instant::now();
    match client
        .get(format!("{}/api/finance/quote", base))
        .query(&[("symbol", symbol), ("fields", "price,history")])
        .send()
        .await
    {
        Ok(response) => {
            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            println!("  Status: {}, latency: {} ms", status.as_u16(), started.elapsed().as_millis());
            if status.is_success() {
                println!("  Price: {} {} (source {})", body["price"], body["currency"], body["source"]);
                let history = body["history"].as_array().cloned().unwrap_or_default();
                println!("  Points returned: {} (showing up to 3)", history.len());
                for point in history.iter().take(3) {
                    println!("    {} close={}", point["timestamp"], point["price"]);
                }
            } else {
                println!("  Error response: {}", summarize(&body.to_string()));
                ok = false;
            }
        }
        Err(e) => {
            println!("  Failed to call finance endpoint: {}", e);
            ok = false;
        }
    }

    println!("\nSummary:");
    if ok {
        println!("  ✅ All smoke tests passed");
        Ok(())
    } else {
        println!("  ❌ One or more checks failed");
        std::process::exit(3);
    }
}

fn summarize(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > 300 {
        format!("{}...", flat.chars().take(300).collect::<String>())
    } else {
        flat
    }
}
