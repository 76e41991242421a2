use anyhow::{Context, Result};
use clone_all::{
    ProviderKind,
    auth::{OAuthClient, TokenManager, open_store},
    config::Config,
    orchestrator::Orchestrator,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const USAGE: &str = "Usage: clone-all [clone [<path>] | auth <github|bitbucket> | status | clear]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("clone");

    if matches!(command, "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    let store = open_store(&config.oauth).context("Failed to open credential store")?;

    match command {
        "clone" => {
            if let Some(path) = args.get(1) {
                config.clone.path = path.clone();
            }

            info!("clone-all v{}", clone_all::VERSION);
            let orchestrator = Orchestrator::from_config(&config, store);
            match orchestrator.run().await {
                Ok(summary) => {
                    let total: usize = summary.iter().map(|(_, n)| n).sum();
                    info!("Done: {} repositories cloned into {}", total, config.clone.base_dir().display());
                }
                // Already logged by the orchestrator
                Err(_) => std::process::exit(1),
            }
        }

        "auth" => {
            let provider = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("{}", USAGE))?
                .parse::<ProviderKind>()
                .map_err(anyhow::Error::msg)?;
            let (_, credentials) = config
                .enabled_providers()
                .into_iter()
                .find(|(kind, _)| *kind == provider)
                .with_context(|| format!("No client credentials configured for {}", provider))?;

            let flow = Arc::new(OAuthClient::new(provider, credentials, &config.oauth));
            let tokens = TokenManager::new(provider, store, flow);
            tokens.authorize_interactive().await?;

            if let Some(creds) = tokens.credentials()? {
                println!("🔒 Tokens stored for {}", provider.display_name());
                println!("⏰ Expires: {}\n", creds.expires_at);
            }
        }

        "status" => {
            println!("\n🔐 Authentication Status");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

            for provider in ProviderKind::ALL {
                let name = provider.display_name();
                match store.load(provider) {
                    Ok(Some(creds)) if !creds.is_expired() => {
                        let remaining = creds.remaining();
                        let time_str = if remaining.num_hours() > 0 {
                            format!("{} hours", remaining.num_hours())
                        } else if remaining.num_minutes() > 0 {
                            format!("{} minutes", remaining.num_minutes())
                        } else {
                            format!("{} seconds", remaining.num_seconds())
                        };
                        println!("✅ {}: authenticated ({} remaining)", name, time_str);
                    }
                    Ok(Some(_)) => println!("⚠️  {}: expired (will auto-refresh)", name),
                    Ok(None) => println!("❌ {}: not authenticated", name),
                    Err(e) => println!("❌ {}: {}", name, e),
                }
            }
            println!();
        }

        "clear" => {
            for provider in ProviderKind::ALL {
                store.delete(provider)?;
            }
            println!("\n✅ All stored tokens cleared\n");
        }

        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }

    Ok(())
}
