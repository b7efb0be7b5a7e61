//! Client library for the donation platform API
//!
//! Session handling with one-shot token refresh, donation and payment
//! lookups, payment status reconciliation and deep link resolution.

pub mod api;
pub mod auth;
pub mod config;
pub mod deeplink;
pub mod models;
pub mod payment;
