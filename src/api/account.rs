//! Authentication endpoints (/auth/*)

use anyhow::Result;
use serde::Serialize;

use super::client::{ApiClient, ApiResponse};
use super::error::ApiError;
use crate::models::{LoginData, User};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SmsResetRequest<'a> {
    phone: &'a str,
    code: &'a str,
    new_password: &'a str,
}

/// Log in with email or phone and store the returned session.
pub async fn login_with_client(
    client: &ApiClient,
    identifier: &str,
    password: &str,
) -> Result<Option<User>, ApiError> {
    let resp: ApiResponse<LoginData> = client
        .post(
            "/auth/login",
            &LoginRequest {
                identifier,
                password,
            },
        )
        .await?;
    let data = resp.into_data()?;
    client.tokens().store(data.session())?;
    tracing::info!("Logged in");
    Ok(data.user)
}

pub async fn change_password_with_client(
    client: &ApiClient,
    current_password: &str,
    new_password: &str,
) -> Result<Option<String>, ApiError> {
    client
        .put::<serde_json::Value, _>(
            "/auth/change-password",
            &ChangePasswordRequest {
                current_password,
                new_password,
            },
        )
        .await?
        .into_message()
}

pub async fn request_reset_code_with_client(
    client: &ApiClient,
    email: &str,
) -> Result<Option<String>, ApiError> {
    client
        .post::<serde_json::Value, _>(
            "/auth/request-password-reset-code",
            &serde_json::json!({ "email": email }),
        )
        .await?
        .into_message()
}

pub async fn request_reset_sms_code_with_client(
    client: &ApiClient,
    phone: &str,
) -> Result<Option<String>, ApiError> {
    client
        .post::<serde_json::Value, _>(
            "/auth/request-password-reset-sms-code",
            &serde_json::json!({ "phone": phone }),
        )
        .await?
        .into_message()
}

pub async fn reset_password_with_sms_code_with_client(
    client: &ApiClient,
    phone: &str,
    code: &str,
    new_password: &str,
) -> Result<Option<String>, ApiError> {
    client
        .post::<serde_json::Value, _>(
            "/auth/reset-password-with-sms-code",
            &SmsResetRequest {
                phone,
                code,
                new_password,
            },
        )
        .await?
        .into_message()
}

/// Change the password of the logged-in user (prints to stdout).
pub async fn change_password(current_password: &str, new_password: &str) -> Result<()> {
    let client = ApiClient::connect()?;
    let message = change_password_with_client(&client, current_password, new_password).await?;
    println!("{}", message.as_deref().unwrap_or("Password changed."));
    Ok(())
}

/// Request a password reset code by email, or by SMS when `sms` is set.
pub async fn request_reset_code(target: &str, sms: bool) -> Result<()> {
    let client = ApiClient::connect()?;
    let message = if sms {
        request_reset_sms_code_with_client(&client, target).await?
    } else {
        request_reset_code_with_client(&client, target).await?
    };
    println!(
        "{}",
        message.as_deref().unwrap_or("Reset code requested.")
    );
    Ok(())
}

/// Reset the password with a code received by SMS.
pub async fn reset_password(phone: &str, code: &str, new_password: &str) -> Result<()> {
    let client = ApiClient::connect()?;
    let message =
        reset_password_with_sms_code_with_client(&client, phone, code, new_password).await?;
    println!("{}", message.as_deref().unwrap_or("Password reset."));
    Ok(())
}
