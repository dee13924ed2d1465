//! GDAI auth demo
//!
//! Loads authentication settings from the environment and walks through the
//! sign-in pipeline. Logs go to stderr; stdout carries only JSON.
//!
//! ```text
//! SNOWFLAKE_DEV_AUTH=true SNOWFLAKE_ACCOUNT=acme-xy12345 \
//! SNOWFLAKE_PRIVATE_KEY_PATH=./rsa_key.p8 \
//!     gdai-auth-demo sign-in --username ada@example.com
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gdai_auth::providers::key_pair;
use gdai_auth::{AuthSettings, GuardDecision, RouteGuard, SessionOrchestrator, SignInRequest};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gdai-auth-demo", version, about = "Exercise GDAI sign-in from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the sign-in providers enabled by the environment
    Providers,

    /// Sign in with the development key pair and print the session
    SignIn {
        /// Warehouse user name
        #[arg(long, short = 'u', env = "SNOWFLAKE_USER")]
        username: String,
    },

    /// Show how the route guard treats an anonymous request
    Guard {
        /// Request path
        path: String,

        /// Application origin
        #[arg(long, default_value = "http://localhost:3000")]
        origin: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Providers => {
            let orchestrator = orchestrator()?;
            println!("{}", json!({ "providers": orchestrator.registry().ids() }));
        }
        Commands::SignIn { username } => {
            let orchestrator = orchestrator()?;
            info!(username = %username, "Signing in with the development key pair");
            let (session_id, session) = orchestrator
                .sign_in(key_pair::PROVIDER_ID, SignInRequest::Credentials { username })
                .await
                .context("sign-in failed")?;
            info!(session = %session_id, tier = %session.permission_tier, "Signed in");
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "session_id": session_id,
                    "session": session,
                }))?
            );
        }
        Commands::Guard { path, origin } => {
            let guard = RouteGuard::new(&origin).context("invalid origin")?;
            let decision = match guard.check(&path, None) {
                GuardDecision::Allow => json!({ "path": path, "decision": "allow" }),
                GuardDecision::Redirect(url) => {
                    json!({ "path": path, "decision": "redirect", "location": url.as_str() })
                }
            };
            println!("{decision}");
        }
    }

    Ok(())
}

fn orchestrator() -> Result<SessionOrchestrator> {
    let settings = AuthSettings::from_env().context("failed to load authentication settings")?;
    debug!(
        oauth = settings.entra.is_some(),
        dev_key_pair = settings.dev_key_pair.is_some(),
        "Loaded settings from environment"
    );
    SessionOrchestrator::from_settings(&settings).context("failed to wire sign-in providers")
}
