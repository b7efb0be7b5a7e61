//! User profile endpoint (/users/profile)

use anyhow::{bail, Result};

use super::client::{ApiClient, ApiResponse};
use super::error::ApiError;
use crate::models::{ProfileUpdate, User};

pub async fn profile_with_client(client: &ApiClient) -> Result<User, ApiError> {
    let resp: ApiResponse<User> = client.get("/users/profile").await?;
    resp.into_data()
}

pub async fn update_profile_with_client(
    client: &ApiClient,
    update: &ProfileUpdate,
) -> Result<User, ApiError> {
    let resp: ApiResponse<User> = client.put("/users/profile", update).await?;
    resp.into_data()
}

fn print_user(user: &User) {
    println!();
    println!("Name:  {}", user.display_name());
    println!("Email: {}", user.email.as_deref().unwrap_or("(none)"));
    println!("Phone: {}", user.phone.as_deref().unwrap_or("(none)"));
    println!("ID:    {}", user.id);
}

/// Fetch and display the current user's profile.
pub async fn whoami() -> Result<()> {
    let client = ApiClient::connect()?;
    let user = profile_with_client(&client).await?;
    print_user(&user);
    Ok(())
}

/// Update profile fields and display the result.
pub async fn update_profile(update: ProfileUpdate) -> Result<()> {
    if update.is_empty() {
        bail!("Nothing to update. Pass at least one of --first-name, --last-name, --email, --phone");
    }
    let client = ApiClient::connect()?;
    let user = update_profile_with_client(&client, &update).await?;
    println!("Profile updated.");
    print_user(&user);
    Ok(())
}
