//! tollgate: command-line authorization checks.
//!
//! Evaluates one request against a tenant's live configuration, or lists
//! the tenant's mapping rules.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::debug;

use tollgate::config::{ACCESS_TOKEN_ENV, Config, Secrets};
use tollgate::providers::{ConfigFetcher, SystemClient};
use tollgate::{AuthorizationRequest, TenantParams, Tollgate, TollgateError};

/// Tollgate CLI
#[derive(Parser)]
#[command(name = "tollgate")]
#[command(version = tollgate::PKG_VERSION)]
#[command(about = "Authorize requests against an API-management backend")]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authorize one request and report usage
    Check {
        #[command(flatten)]
        tenant: TenantArgs,
        /// Request path, including the query string
        path: String,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Single-key credential
        #[arg(long, conflicts_with = "app_id")]
        user_key: Option<String>,
        /// Application identifier
        #[arg(long)]
        app_id: Option<String>,
        /// Application key (with --app-id)
        #[arg(long, requires = "app_id")]
        app_key: Option<String>,
    },

    /// Fetch and print a tenant's mapping rules
    Rules {
        #[command(flatten)]
        tenant: TenantArgs,
    },
}

#[derive(Args)]
struct TenantArgs {
    /// Named tenant from the configuration file
    #[arg(short, long, conflicts_with_all = ["system_url", "service_id"])]
    tenant: Option<String>,
    /// Base URL of the API-management system
    #[arg(long, requires = "service_id")]
    system_url: Option<String>,
    /// Service identifier
    #[arg(long, requires = "system_url")]
    service_id: Option<String>,
    /// Access token for the system API
    #[arg(long, env = ACCESS_TOKEN_ENV, hide_env_values = true)]
    access_token: Option<String>,
}

impl TenantArgs {
    fn resolve(&self, config: &Config, secrets: &Secrets) -> tollgate::Result<TenantParams> {
        if let Some(name) = &self.tenant {
            let mut tenant = config.tenant(name, secrets)?;
            if let Some(token) = &self.access_token {
                tenant.access_token = token.clone();
            }
            return Ok(tenant);
        }

        let (Some(system_url), Some(service_id)) = (&self.system_url, &self.service_id) else {
            return Err(TollgateError::InvalidInput(
                "either --tenant or --system-url with --service-id is required".into(),
            ));
        };
        let access_token = self.access_token.clone().ok_or_else(|| {
            TollgateError::InvalidInput(format!(
                "--access-token (or {ACCESS_TOKEN_ENV}) is required"
            ))
        })?;
        Ok(TenantParams::new(system_url, service_id, access_token))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let secrets = Secrets::load()?;
    debug!(version = tollgate::version_string(), "tollgate starting");

    match cli.command {
        Command::Check {
            tenant,
            path,
            method,
            user_key,
            app_id,
            app_key,
        } => {
            let tenant = tenant.resolve(&config, &secrets)?;
            let mut request = AuthorizationRequest::new(method, path);
            if let Some(key) = user_key {
                request = request.user_key(key);
            } else if let Some(id) = app_id {
                request = request.app_id(id, app_key);
            }

            // One-shot evaluation; nothing would ever read a cached entry.
            let authorizer = config.apply(Tollgate::builder()).disable_cache().build()?;
            let result = authorizer.authorize(&tenant, &request).await;

            println!("status:  {} ({})", result.status, result.status.rpc_code());
            if !result.message.is_empty() {
                println!("message: {}", result.message);
            }
            if let Some(usage) = &result.usage {
                for (metric, delta) in usage.iter() {
                    println!("usage:   {metric} += {delta}");
                }
            }

            Ok(if result.is_allowed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Rules { tenant } => {
            let tenant = tenant.resolve(&config, &secrets)?;
            let client = SystemClient::with_timeout(std::time::Duration::from_secs(
                config.client.timeout_secs,
            ))?
            .environment(config.client.environment.clone());
            let proxy = client.fetch(&tenant).await?;

            println!("service: {}", proxy.service_id);
            println!("backend: {}", proxy.backend_endpoint);
            let rules = proxy.rules();
            if rules.is_empty() {
                println!("no mapping rules");
            }
            for rule in rules {
                let marker = if rule.is_valid() { "" } else { "  (invalid pattern)" };
                println!("  {rule}{marker}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
