use std::io::{self, Write};

use clap::{Parser, Subcommand};

use trove::auth::callback::CallbackOutcome;
use trove::auth::session::NormalizedUser;
use trove::auth::{self, oauth};
use trove::config::IdentityConfig;
use trove::consts;

#[derive(Parser)]
#[command(name = "trove", version, about = "One tab's trash is another tab's treasure.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database path for credential persistence (use :memory: for ephemeral)
    #[arg(short, long)]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Log in via the hosted identity provider (OAuth2 code flow)
    Login {
        /// Use the direct username/password flow instead of the browser
        #[arg(long)]
        direct: bool,

        /// Username for the direct flow (prompted when omitted)
        #[arg(long)]
        username: Option<String>,

        /// Page origin to run the flow under; selects the redirect URI
        #[arg(long, default_value = "http://localhost:5173")]
        origin: String,
    },
    /// Remove stored credentials
    Logout,
    /// Show the currently resolved user
    Whoami,
    /// Reconcile a pasted OAuth redirect URL
    Callback {
        /// The full URL the provider redirected to
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db = cli
        .db
        .unwrap_or_else(|| consts::default_db_path().to_string_lossy().into_owned());
    let config = IdentityConfig::from_env();

    match cli.command {
        Command::Login {
            direct: true,
            username,
            ..
        } => handle_direct_login(&db, &config, username).await,
        Command::Login { origin, .. } => handle_hosted_login(&db, &config, &origin).await,
        Command::Logout => {
            auth::logout(&db)?;
            println!("✓ Logged out.");
            Ok(())
        }
        Command::Whoami => {
            print_user(auth::whoami(&db, &config).await?);
            Ok(())
        }
        Command::Callback { url } => {
            report(auth::login(&db, &config, &url).await?);
            Ok(())
        }
    }
}

async fn handle_hosted_login(
    db: &str,
    config: &IdentityConfig,
    origin: &str,
) -> anyhow::Result<()> {
    let redirect_uri = config.redirect_uri_for(origin);
    let url = oauth::build_authorize_url(config, redirect_uri);

    // Try to open browser, silently ignore failures (e.g. headless/SSH)
    let _ = open::that(&url);

    println!("Open this URL to authenticate:\n");
    println!("  {}\n", url);

    print!("Paste the redirect URL you landed on: ");
    io::stdout().flush()?;
    let mut pasted = String::new();
    io::stdin().read_line(&mut pasted)?;
    let pasted = pasted.trim();

    if pasted.is_empty() {
        anyhow::bail!("no redirect URL provided");
    }

    println!("\nExchanging code for tokens...");
    report(auth::login(db, config, pasted).await?);
    Ok(())
}

async fn handle_direct_login(
    db: &str,
    config: &IdentityConfig,
    username: Option<String>,
) -> anyhow::Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = prompt("Password: ")?;

    let user = auth::login_direct(db, config, &username, &password).await?;
    println!("✓ Signed in.");
    print_user(user);
    Ok(())
}

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("empty input");
    }
    Ok(value.to_string())
}

fn report(outcome: CallbackOutcome) {
    match outcome {
        CallbackOutcome::Navigated(nav) => {
            println!("✓ Logged in. Continue at {}", nav.route());
        }
        CallbackOutcome::Failed {
            error,
            redirect,
            redirect_after,
        } => {
            eprintln!("✗ {}", error.user_message());
            eprintln!(
                "  returning to {} in {}s",
                redirect.route(),
                redirect_after.as_secs()
            );
        }
    }
}

fn print_user(user: Option<NormalizedUser>) {
    match user {
        Some(user) => {
            println!("  subject   {}", user.subject);
            println!("  email     {}", user.email.as_deref().unwrap_or("—"));
            println!("  name      {}", user.display_name.as_deref().unwrap_or("—"));
            println!(
                "  role      {}",
                match user.role {
                    Some(role) => format!("{role:?}"),
                    None => "—".to_string(),
                }
            );
        }
        None => println!("not signed in"),
    }
}
