//! Payment outcome classification

use std::fmt;

use crate::models::PaymentStatus;

/// Determinate result of a reconciliation run.
///
/// `Failed` means the provider or backend reported a failed payment;
/// `NoPaymentFound` means no payment record ever appeared. `SignedOut`
/// means a lookup was refused because the session is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Processing,
    Failed,
    /// Status outside the known vocabulary; neither success nor failure
    Informational(String),
    NoPaymentFound,
    DonationNotFound,
    SignedOut,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("payment successful"),
            Self::Processing => f.write_str("payment processing"),
            Self::Failed => f.write_str("payment failed"),
            Self::Informational(status) => write!(f, "payment status: {}", status),
            Self::NoPaymentFound => f.write_str("no payment found"),
            Self::DonationNotFound => f.write_str("donation not found"),
            Self::SignedOut => f.write_str("session expired"),
        }
    }
}

/// Classify a status cached by the backend.
pub fn classify_cached(status: PaymentStatus) -> Outcome {
    match status {
        PaymentStatus::Completed | PaymentStatus::Paid => Outcome::Success,
        PaymentStatus::Processing | PaymentStatus::Pending | PaymentStatus::Initialized => {
            Outcome::Processing
        }
        PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Expired => {
            Outcome::Failed
        }
        PaymentStatus::Unknown => Outcome::Informational(status.to_string()),
    }
}

/// Classify a raw status string, e.g. one carried by a deep link.
pub fn classify_status_str(status: &str) -> Outcome {
    match PaymentStatus::parse(status) {
        PaymentStatus::Unknown => Outcome::Informational(status.to_string()),
        known => classify_cached(known),
    }
}
