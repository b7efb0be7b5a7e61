//! Donation and payment lookups

use anyhow::Result;
use async_trait::async_trait;

use super::client::{encode_segment, ApiClient, ApiResponse};
use super::error::ApiError;
use crate::models::{latest_payment, Donation, PaymentRecord};
use crate::payment::PaymentSource;

pub async fn donation_with_client(client: &ApiClient, donation_id: &str) -> Result<Donation, ApiError> {
    let resp: ApiResponse<Donation> = client
        .get(&format!("/donations/{}", encode_segment(donation_id)))
        .await?;
    resp.into_data()
}

/// All payment attempts recorded for a donation (possibly empty).
pub async fn payments_for_donation_with_client(
    client: &ApiClient,
    donation_id: &str,
) -> Result<Vec<PaymentRecord>, ApiError> {
    let resp: ApiResponse<Vec<PaymentRecord>> = client
        .get(&format!("/payments/donation/{}", encode_segment(donation_id)))
        .await?;
    if !resp.success {
        return resp.into_data();
    }
    Ok(resp.data.unwrap_or_default())
}

pub async fn payment_with_client(
    client: &ApiClient,
    payment_id: &str,
) -> Result<PaymentRecord, ApiError> {
    let resp: ApiResponse<PaymentRecord> = client
        .get(&format!("/payments/{}", encode_segment(payment_id)))
        .await?;
    resp.into_data()
}

#[async_trait]
impl PaymentSource for ApiClient {
    async fn donation(&self, donation_id: &str) -> Result<Donation, ApiError> {
        donation_with_client(self, donation_id).await
    }

    async fn payments_for_donation(&self, donation_id: &str) -> Result<Vec<PaymentRecord>, ApiError> {
        payments_for_donation_with_client(self, donation_id).await
    }

    async fn payment(&self, payment_id: &str) -> Result<PaymentRecord, ApiError> {
        payment_with_client(self, payment_id).await
    }
}

/// Show a donation (prints to stdout).
pub async fn show_donation(donation_id: &str) -> Result<()> {
    let client = ApiClient::connect()?;
    let donation = donation_with_client(&client, donation_id).await?;

    println!();
    println!("Donation: {}", donation.id);
    println!("  Amount:   {} {}", donation.amount, donation.currency);
    println!(
        "  Status:   {}",
        donation.status.as_deref().unwrap_or("(unknown)")
    );
    if let Some(ref campaign) = donation.campaign_id {
        println!("  Campaign: {}", campaign);
    }
    if let Some(created) = donation.created_at {
        println!("  Created:  {}", created.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

/// List the payments of a donation, newest first (prints to stdout).
pub async fn list_payments(donation_id: &str) -> Result<()> {
    let client = ApiClient::connect()?;
    let mut payments = payments_for_donation_with_client(&client, donation_id).await?;

    println!("\nPayments for donation {}:", donation_id);
    println!("{:-<60}", "");

    if payments.is_empty() {
        println!("  (no payments found)");
        return Ok(());
    }

    let latest_id = latest_payment(&payments).map(|p| p.id.clone());
    payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    for p in &payments {
        let marker = if Some(&p.id) == latest_id.as_ref() { "*" } else { " " };
        println!(
            "{} {}  {:<10} {:<12} {} {}",
            marker,
            p.created_at.format("%Y-%m-%d %H:%M"),
            p.status,
            p.provider,
            p.amount,
            p.currency
        );
        println!("    ID: {}", p.id);
        if let Some(ref ext) = p.external_transaction_id {
            println!("    Transaction: {}", ext);
        }
    }
    println!();
    Ok(())
}
