//! Payment status reconciliation

mod classify;
pub mod moneyfusion;
pub mod reconcile;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use classify::{classify_cached, classify_status_str, Outcome};
pub use moneyfusion::{MoneyFusionVerifier, ProviderStatus, ProviderVerifier};
pub use reconcile::{
    Cancelled, ReconcileInput, ReconcileState, Reconciler, Resolution, RetryPolicy, Sleeper,
    StatusSource, TokioSleeper,
};

use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::deeplink::{self, LinkKind};
use crate::models::{Donation, PaymentRecord};

/// Backend lookups the reconciler needs.
#[async_trait]
pub trait PaymentSource: Send + Sync {
    async fn donation(&self, donation_id: &str) -> Result<Donation, ApiError>;

    async fn payments_for_donation(&self, donation_id: &str)
        -> Result<Vec<PaymentRecord>, ApiError>;

    async fn payment(&self, payment_id: &str) -> Result<PaymentRecord, ApiError>;
}

/// Reconciler wired to the API client and MoneyFusion per config.
pub fn reconciler_from_config(client: Arc<ApiClient>, config: &Config) -> Result<Reconciler> {
    let verifier = MoneyFusionVerifier::new(&config.api.moneyfusion_url, config.api.timeout())?;
    Ok(
        Reconciler::new(client, RetryPolicy::from_settings(&config.reconcile))
            .with_verifier(Arc::new(verifier)),
    )
}

/// Token cancelled on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    cancel
}

async fn run_and_print(config: &Config, input: ReconcileInput) -> Result<()> {
    let client = Arc::new(ApiClient::connect()?);
    let reconciler = reconciler_from_config(client, config)?;

    println!("Checking payment status...");
    let resolution = match reconciler.run(&input, &ctrl_c_token()).await {
        Ok(resolution) => resolution,
        Err(Cancelled) => {
            println!("Cancelled.");
            return Ok(());
        }
    };

    if resolution.outcome == Outcome::SignedOut {
        bail!("Session expired. Run `donate-cli login` to sign in again.");
    }

    println!();
    println!("Result: {}", resolution.outcome);
    if let Some(ref payment) = resolution.payment {
        println!("  Payment:  {}", payment.id);
        println!("  Provider: {}", payment.provider);
        println!("  Amount:   {} {}", payment.amount, payment.currency);
        if let Some(ref ext) = payment.external_transaction_id {
            println!("  Transaction: {}", ext);
        }
    }
    match resolution.source {
        Some(StatusSource::Provider) => println!("  (confirmed with payment provider)"),
        Some(StatusSource::Cached) => println!("  (status from server)"),
        Some(StatusSource::DeepLink) => println!("  (status from return link)"),
        None => {}
    }
    if matches!(
        resolution.outcome,
        Outcome::Processing | Outcome::NoPaymentFound
    ) {
        println!("\nThe payment may still be in progress. Run the command again to retry.");
    }
    Ok(())
}

/// Reconcile a donation's payment status (prints to stdout).
pub async fn verify(donation_id: &str, payment_id: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    run_and_print(
        &config,
        ReconcileInput::Donation {
            donation_id: donation_id.to_string(),
            payment_id: payment_id.map(String::from),
        },
    )
    .await
}

/// Resolve a deep link of the configured scheme; payment and donation
/// links run reconciliation.
pub async fn open_link(url: &str) -> Result<()> {
    let config = Config::load()?;
    let mut inbox = deeplink::DeepLinkInbox::for_scheme(&config.deep_link_scheme);
    inbox.receive(url);
    let Some(intent) = inbox.take() else {
        bail!("Not a {}:// link: {}", config.deep_link_scheme, url);
    };

    println!("Link type: {:?}", intent.kind);
    for (key, value) in &intent.params {
        println!("  {} = {}", key, value);
    }

    match intent.kind {
        LinkKind::Payment => match intent.payment_link() {
            Some(link) => run_and_print(&config, ReconcileInput::DeepLink(link)).await,
            None => bail!("Payment link is missing transactionId or status"),
        },
        LinkKind::Donation => match intent.donation_id() {
            Some(donation_id) => {
                let input = ReconcileInput::Donation {
                    donation_id,
                    payment_id: None,
                };
                run_and_print(&config, input).await
            }
            None => bail!("Donation link does not name a donation"),
        },
        LinkKind::Other => {
            println!("Nothing to do for this link.");
            Ok(())
        }
    }
}
