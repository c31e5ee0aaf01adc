//! tokenrelay - stateless OAuth2 relay
//!
//! Main entry point for the relay binary.

use anyhow::Result;
use clap::Parser;

use tokenrelay::cli::{Cli, Commands};
use tokenrelay::config::Config;
use tokenrelay::logging::init_tracing;
use tokenrelay::oauth::EndpointVariant;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    init_tracing(&config.logging, cli.verbose)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting relay on {}", config.server.bind);
            tokenrelay::server::serve(config).await?;
            Ok(())
        }
        Commands::CheckConfig => {
            print_endpoints(&config)?;
            Ok(())
        }
    }
}

/// Prints the effective endpoints as expanded for a sample realm. Secrets
/// are never printed.
fn print_endpoints(config: &Config) -> Result<()> {
    let primary = config.idp.primary_endpoints();
    let legacy = config.idp.legacy_endpoints();
    let realm = "example";

    println!("Configuration OK");
    println!("  bind:       {}", config.server.bind);
    println!("  api prefix: {}", config.server.api_prefix);
    println!("  service:    {}", config.idp.service.as_str());
    for (variant, endpoints) in [
        (EndpointVariant::Primary, &primary),
        (EndpointVariant::Legacy, &legacy),
    ] {
        println!("  {variant} endpoints (realm '{realm}'):");
        println!("    authorize: {}", template(endpoints.authorize_url(realm)));
        println!("    token:     {}", template(endpoints.token_url(realm)));
        println!("    revoke:    {}", template(endpoints.revoke_url(realm)));
        match endpoints.user_info_url(realm) {
            Some(url) => println!("    userinfo:  {}", template(url)),
            None => println!("    userinfo:  (not configured)"),
        }
    }
    if let Some(scim) = &config.linking.scim_base_url {
        println!("  scim:       {scim}");
    }
    Ok(())
}

fn template(url: tokenrelay::Result<url::Url>) -> String {
    match url {
        Ok(url) => url.to_string(),
        Err(e) => format!("<invalid: {e}>"),
    }
}
