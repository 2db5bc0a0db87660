use anyhow::Result;
use authgate::{
    AuthConfig, Service, TokenIssuer, auth::DEFAULT_TOKEN_TTL_SECONDS, generate_api_key,
    resolve_config_path, server::demo_routes,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "authgate")]
#[command(about = "Pluggable HTTP authentication gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the demo application (`/health`, `/me`) behind the configured strategy
    Serve {
        /// Configuration file (falls back to AUTHGATE_CONFIG, then the XDG and local defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Issue a self-signed bearer token for a subject
    IssueToken {
        #[arg(long)]
        subject: Uuid,
        #[arg(long, env = "AUTHGATE_SECRET", hide_env_values = true)]
        secret: String,
        #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECONDS)]
        exp_seconds: u64,
        #[arg(long)]
        issuer: Option<String>,
        #[arg(long)]
        audience: Option<String>,
    },
    /// Validate a bearer token and print its claims
    VerifyToken {
        token: String,
        #[arg(long, env = "AUTHGATE_SECRET", hide_env_values = true)]
        secret: String,
        #[arg(long)]
        issuer: Option<String>,
        #[arg(long)]
        audience: Option<String>,
    },
    /// Generate a new API key and its storage digest
    GenerateApiKey,
}

fn token_issuer(
    secret: &str,
    issuer: Option<String>,
    audience: Option<String>,
) -> Result<TokenIssuer> {
    let token_issuer = TokenIssuer::new(secret.as_bytes())?;
    if issuer.is_none() && audience.is_none() {
        return Ok(token_issuer);
    }
    let iss = issuer.unwrap_or_else(|| token_issuer.issuer().to_string());
    let aud = audience.unwrap_or_else(|| token_issuer.audience().to_string());
    Ok(token_issuer.with_claims(iss, aud))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("authgate=info".parse()?))
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => {
            let path = resolve_config_path(config.as_deref())?;
            info!("Loading configuration from {}", path.display());
            let config = AuthConfig::load(&path)?;

            let (service, _store) = Service::from_config(&config).await?;
            let router = service.router(demo_routes())?;

            authgate::server::serve(router, &bind).await?;
        }
        Commands::IssueToken {
            subject,
            secret,
            exp_seconds,
            issuer,
            audience,
        } => {
            let token_issuer = token_issuer(&secret, issuer, audience)?;
            let token = token_issuer.issue(subject, exp_seconds)?;
            println!("{}", token.as_str());
        }
        Commands::VerifyToken {
            token,
            secret,
            issuer,
            audience,
        } => {
            let token_issuer = token_issuer(&secret, issuer, audience)?;
            match token_issuer.validate_claims(&token) {
                Ok(claims) => println!("{}", serde_json::to_string_pretty(&claims)?),
                Err(e) => {
                    eprintln!("Token rejected: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::GenerateApiKey => {
            let (full_key, prefix, key_hash) = generate_api_key();

            println!("API Key generated.");
            println!();
            println!("  Key:     {}", full_key);
            println!("  Prefix:  {}", prefix);
            println!("  SHA-256: {}", key_hash);
            println!();
            println!("IMPORTANT: Save this key now. Only the digest should be stored.");
            println!("Use with: -H 'X-API-Key: {}'", full_key);
        }
    }

    Ok(())
}
