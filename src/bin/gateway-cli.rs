use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the resilience gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway version, uptime and collaborator mode
    Status,
    /// Breaker state, counts and retry settings per pipeline
    Pipelines,
    /// Probe every collaborator
    Health,
    /// Rate limiter quota and live windows
    RateLimits,
    /// Place a single-item order
    Order {
        #[arg(short, long)]
        product: String,

        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        #[arg(long, default_value = "USD")]
        currency: String,

        #[arg(long, default_value = "credit_card")]
        method: String,

        #[arg(long, default_value = "123 Main St")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let res = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)).send().await?,
        Commands::Pipelines => client.get(format!("{}/admin/pipelines", cli.url)).send().await?,
        Commands::Health => client.get(format!("{}/health", cli.url)).send().await?,
        Commands::RateLimits => client.get(format!("{}/admin/rate-limits", cli.url)).send().await?,
        Commands::Order {
            product,
            quantity,
            currency,
            method,
            address,
        } => {
            let body = json!({
                "items": [{ "productId": product, "quantity": quantity }],
                "payment": { "currency": currency, "method": method },
                "shippingAddress": address,
            });
            client
                .post(format!("{}/api/orders", cli.url))
                .json(&body)
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
