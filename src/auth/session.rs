//! Login, logout and status commands

use anyhow::{Context, Result};

use super::tokens::{FileTokenStore, TokenStore};
use crate::api::account::login_with_client;
use crate::api::users::profile_with_client;
use crate::api::ApiClient;
use crate::config::Config;

/// Log in with email or phone number and save the session.
pub async fn login(identifier: &str, password: &str, force: bool) -> Result<()> {
    let client = ApiClient::connect()?;

    if !force && client.tokens().session().is_some() {
        println!("Already logged in. Use --force to log in again.");
        return Ok(());
    }

    tracing::info!("Logging in as {}...", identifier);
    let user = login_with_client(&client, identifier, password)
        .await
        .context("Login failed")?;

    match user {
        Some(user) => println!("Logged in as {}.", user.display_name()),
        None => println!("Login successful."),
    }
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let store = FileTokenStore::open_default()?;
    store.clear()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status, checking the session against the server.
pub async fn status() -> Result<()> {
    let config = Config::load()?;
    println!("API:         {}", config.api.base_url);

    let client = ApiClient::connect()?;
    if client.tokens().session().is_none() {
        println!("Session:     none");
        println!("\nRun 'donate-cli login' to authenticate.");
        return Ok(());
    }

    match profile_with_client(&client).await {
        Ok(user) => {
            println!("Session:     valid");
            println!("User:        {}", user.display_name());
        }
        Err(e) if e.is_auth_failure() => {
            println!("Session:     expired");
            println!("\nRun 'donate-cli login' to authenticate.");
        }
        Err(e) => {
            println!("Session:     present (server check failed: {})", e);
        }
    }
    Ok(())
}
