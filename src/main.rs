//! donate-cli - command-line client for the donation platform

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use donate::models::ProfileUpdate;
use donate::{api, auth, payment};

#[derive(Parser)]
#[command(name = "donate-cli")]
#[command(about = "Command-line client for the donation platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email or phone number
    Login {
        /// Email address or phone number
        identifier: String,

        #[arg(short, long, env = "DONATE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Log in again even if a session exists
        #[arg(short, long)]
        force: bool,
    },

    /// Log out and clear stored credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Show current user profile
    Whoami,

    /// Update profile fields
    UpdateProfile {
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },

    /// Change the password of the logged-in user
    ChangePassword {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },

    /// Request a password reset code
    ResetCode {
        /// Email address, or phone number with --sms
        target: String,

        /// Send the code by SMS
        #[arg(long)]
        sms: bool,
    },

    /// Reset the password with a code received by SMS
    ResetPassword {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        new: String,
    },

    /// Show a donation
    Donation {
        donation_id: String,
    },

    /// List payments recorded for a donation
    Payments {
        donation_id: String,
    },

    /// Check the payment status of a donation, retrying while it settles
    Verify {
        donation_id: String,

        /// Payment to look up if the donation's payment list is unavailable
        #[arg(long)]
        payment_id: Option<String>,
    },

    /// Open an app deep link (e.g. donate://payment/return?transactionId=...)
    Open {
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login {
            identifier,
            password,
            force,
        } => {
            auth::login(&identifier, &password, force).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Whoami => {
            api::users::whoami().await?;
        }
        Commands::UpdateProfile {
            first_name,
            last_name,
            email,
            phone,
        } => {
            api::users::update_profile(ProfileUpdate {
                first_name,
                last_name,
                email,
                phone,
            })
            .await?;
        }
        Commands::ChangePassword { current, new } => {
            api::account::change_password(&current, &new).await?;
        }
        Commands::ResetCode { target, sms } => {
            api::account::request_reset_code(&target, sms).await?;
        }
        Commands::ResetPassword { phone, code, new } => {
            api::account::reset_password(&phone, &code, &new).await?;
        }
        Commands::Donation { donation_id } => {
            api::donations::show_donation(&donation_id).await?;
        }
        Commands::Payments { donation_id } => {
            api::donations::list_payments(&donation_id).await?;
        }
        Commands::Verify {
            donation_id,
            payment_id,
        } => {
            payment::verify(&donation_id, payment_id.as_deref()).await?;
        }
        Commands::Open { url } => {
            payment::open_link(&url).await?;
        }
    }

    Ok(())
}
