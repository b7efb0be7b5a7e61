//! Payment reconciliation
//!
//! After the user comes back from an external payment page, the backend may
//! not have heard from the provider yet. The reconciler polls the donation's
//! payments a bounded number of times with a growing delay, asks the
//! provider directly when it can, and settles on the first determinate
//! answer.
//!
//! Progress is published on a watch channel:
//! `Idle -> Fetching -> Verifying -> Resolved`. Every network call and every
//! delay races the caller's cancellation token; a cancelled run leaves the
//! state at `Idle`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::classify::{classify_cached, classify_status_str, Outcome};
use super::moneyfusion::ProviderVerifier;
use super::PaymentSource;
use crate::config::ReconcileSettings;
use crate::deeplink::PaymentLink;
use crate::models::{latest_payment, PaymentRecord};

/// Where the reconciled status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// Direct check against the payment provider
    Provider,
    /// Status stored by the backend
    Cached,
    /// Status parameter of the deep link itself
    DeepLink,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub outcome: Outcome,
    pub payment: Option<PaymentRecord>,
    pub source: Option<StatusSource>,
    /// Payment lookup attempts made (0 when none were needed or possible)
    pub attempts: u32,
}

impl Resolution {
    fn without_payment(outcome: Outcome, attempts: u32) -> Self {
        Self {
            outcome,
            payment: None,
            source: None,
            attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileState {
    Idle,
    Fetching { attempt: u32 },
    Verifying { attempt: u32 },
    Resolved(Resolution),
}

/// What to reconcile.
#[derive(Debug, Clone)]
pub enum ReconcileInput {
    Donation {
        donation_id: String,
        payment_id: Option<String>,
    },
    DeepLink(PaymentLink),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("payment reconciliation cancelled")]
pub struct Cancelled;

/// Delay abstraction so the retry schedule can run without real timers.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounded retry with a progressive delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ReconcileSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff_unit: Duration::from_millis(settings.backoff_unit_ms),
        }
    }

    /// Wait before `attempt` (1-based): none for the first, then
    /// `(2N - 1)` units, i.e. 3s and 5s with the default unit. Saturates
    /// at `Duration::MAX`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            let units = attempt.saturating_mul(2).saturating_sub(1);
            self.backoff_unit.saturating_mul(units)
        }
    }
}

/// One way of finding the payment to reconcile.
#[derive(Debug, Clone, Copy)]
enum LookupStrategy<'a> {
    AllForDonation(&'a str),
    SinglePayment(&'a str),
}

enum Lookup {
    Found(PaymentRecord),
    Nothing,
    SignedOut,
}

pub struct Reconciler {
    source: Arc<dyn PaymentSource>,
    verifier: Option<Arc<dyn ProviderVerifier>>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    state: watch::Sender<ReconcileState>,
}

impl Reconciler {
    pub fn new(source: Arc<dyn PaymentSource>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ReconcileState::Idle);
        Self {
            source,
            verifier: None,
            sleeper: Arc::new(TokioSleeper),
            policy,
            state,
        }
    }

    /// Enable direct MoneyFusion checks.
    pub fn with_verifier(mut self, verifier: Arc<dyn ProviderVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconcileState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ReconcileState {
        self.state.borrow().clone()
    }

    /// Run the flow from attempt 1. Calling it again is the manual retry.
    pub async fn run(
        &self,
        input: &ReconcileInput,
        cancel: &CancellationToken,
    ) -> Result<Resolution, Cancelled> {
        self.set_state(ReconcileState::Idle);

        let result = match input {
            ReconcileInput::Donation {
                donation_id,
                payment_id,
            } => {
                self.reconcile_donation(donation_id, payment_id.as_deref(), cancel)
                    .await
            }
            ReconcileInput::DeepLink(link) => match (&link.donation_id, &link.payment_id) {
                (Some(donation_id), payment_id) => {
                    self.reconcile_donation(donation_id, payment_id.as_deref(), cancel)
                        .await
                }
                (None, Some(payment_id)) => {
                    self.poll(&[LookupStrategy::SinglePayment(payment_id)], cancel)
                        .await
                }
                (None, None) => Ok(Resolution {
                    outcome: classify_status_str(&link.status),
                    payment: None,
                    source: Some(StatusSource::DeepLink),
                    attempts: 0,
                }),
            },
        };

        match result {
            Ok(ref resolution) => {
                tracing::info!(
                    "Payment reconciliation finished after {} attempt(s): {}",
                    resolution.attempts,
                    resolution.outcome
                );
                self.set_state(ReconcileState::Resolved(resolution.clone()));
            }
            Err(Cancelled) => {
                tracing::info!("Payment reconciliation cancelled");
                self.set_state(ReconcileState::Idle);
            }
        }
        result
    }

    async fn reconcile_donation(
        &self,
        donation_id: &str,
        payment_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Resolution, Cancelled> {
        self.set_state(ReconcileState::Fetching { attempt: 1 });
        match cancellable(cancel, self.source.donation(donation_id)).await? {
            Ok(_) => {}
            Err(e) if e.is_auth_failure() => {
                tracing::warn!("Donation {} lookup refused: {}", donation_id, e);
                return Ok(Resolution::without_payment(Outcome::SignedOut, 0));
            }
            Err(e) => {
                tracing::warn!("Donation {} lookup failed: {}", donation_id, e);
                return Ok(Resolution::without_payment(Outcome::DonationNotFound, 0));
            }
        }

        let mut strategies = vec![LookupStrategy::AllForDonation(donation_id)];
        if let Some(payment_id) = payment_id {
            strategies.push(LookupStrategy::SinglePayment(payment_id));
        }
        self.poll(&strategies, cancel).await
    }

    /// The bounded retry loop.
    async fn poll(
        &self,
        strategies: &[LookupStrategy<'_>],
        cancel: &CancellationToken,
    ) -> Result<Resolution, Cancelled> {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tracing::debug!(
                    "Waiting {}ms before attempt {}/{}",
                    delay.as_millis(),
                    attempt,
                    max_attempts
                );
                cancellable(cancel, self.sleeper.sleep(delay)).await?;
            }

            self.set_state(ReconcileState::Fetching { attempt });
            tracing::info!(
                "Checking payment status (attempt {}/{})",
                attempt,
                max_attempts
            );

            let payment = match self.find_payment(strategies, cancel).await? {
                Lookup::Found(payment) => payment,
                Lookup::Nothing => {
                    tracing::info!("No payment recorded yet");
                    continue;
                }
                Lookup::SignedOut => {
                    return Ok(Resolution::without_payment(Outcome::SignedOut, attempt));
                }
            };

            self.set_state(ReconcileState::Verifying { attempt });
            let (outcome, source) = self.classify(&payment, cancel).await?;
            return Ok(Resolution {
                outcome,
                payment: Some(payment),
                source: Some(source),
                attempts: attempt,
            });
        }

        Ok(Resolution::without_payment(
            Outcome::NoPaymentFound,
            max_attempts,
        ))
    }

    /// Try each strategy in order; the first one that yields a record wins.
    /// An auth failure stops the search.
    async fn find_payment(
        &self,
        strategies: &[LookupStrategy<'_>],
        cancel: &CancellationToken,
    ) -> Result<Lookup, Cancelled> {
        for strategy in strategies {
            let found = match *strategy {
                LookupStrategy::AllForDonation(donation_id) => {
                    cancellable(cancel, self.source.payments_for_donation(donation_id))
                        .await?
                        .map(|payments| latest_payment(&payments).cloned())
                }
                LookupStrategy::SinglePayment(payment_id) => {
                    cancellable(cancel, self.source.payment(payment_id))
                        .await?
                        .map(Some)
                }
            };

            match found {
                Ok(Some(payment)) => return Ok(Lookup::Found(payment)),
                Ok(None) => {}
                Err(e) if e.is_auth_failure() => {
                    tracing::warn!("Payment lookup {:?} refused: {}", strategy, e);
                    return Ok(Lookup::SignedOut);
                }
                Err(e) => tracing::warn!("Payment lookup {:?} failed: {}", strategy, e),
            }
        }
        Ok(Lookup::Nothing)
    }

    /// Provider check for MoneyFusion payments, cached status otherwise or
    /// when the provider check fails.
    async fn classify(
        &self,
        payment: &PaymentRecord,
        cancel: &CancellationToken,
    ) -> Result<(Outcome, StatusSource), Cancelled> {
        if payment.is_moneyfusion() {
            if let (Some(verifier), Some(token)) =
                (&self.verifier, payment.verification_token.as_deref())
            {
                match cancellable(cancel, verifier.verify(token)).await? {
                    Ok(status) => return Ok((status.outcome(), StatusSource::Provider)),
                    Err(e) => tracing::warn!(
                        "Provider check for payment {} failed, using cached status: {}",
                        payment.id,
                        e
                    ),
                }
            }
        }
        Ok((classify_cached(payment.status), StatusSource::Cached))
    }

    fn set_state(&self, state: ReconcileState) {
        self.state.send_replace(state);
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::models::{Donation, PaymentStatus, MONEYFUSION};
    use crate::payment::ProviderStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn payment(id: &str, provider: &str, status: PaymentStatus, created_at: &str) -> PaymentRecord {
        PaymentRecord {
            id: id.into(),
            donation_id: "d1".into(),
            provider: provider.into(),
            status,
            amount: 1000.0,
            currency: "XOF".into(),
            external_transaction_id: None,
            verification_token: (provider == MONEYFUSION).then(|| format!("tok-{}", id)),
            created_at: created_at.parse().unwrap(),
        }
    }

    fn not_found(what: &str) -> ApiError {
        ApiError::NotFound {
            url: what.into(),
            message: None,
        }
    }

    fn expired() -> ApiError {
        ApiError::SessionExpired("refresh token revoked".into())
    }

    /// Snapshot of the published state taken whenever the reconciler calls
    /// out to a fake.
    #[derive(Default)]
    struct StateLog {
        watcher: Mutex<Option<watch::Receiver<ReconcileState>>>,
        seen: Mutex<Vec<ReconcileState>>,
    }

    impl StateLog {
        fn watch(&self, reconciler: &Reconciler) {
            *self.watcher.lock().unwrap() = Some(reconciler.subscribe());
        }

        fn record(&self) {
            if let Some(ref watcher) = *self.watcher.lock().unwrap() {
                let state = watcher.borrow().clone();
                self.seen.lock().unwrap().push(state);
            }
        }
    }

    /// Scripted backend: each `payments_for_donation` call pops the next
    /// entry; `None` entries are lookup errors, an empty queue means no
    /// payments.
    #[derive(Default)]
    struct FakeSource {
        donation_missing: bool,
        donation_refused: bool,
        lookups_refused: bool,
        log: Arc<StateLog>,
        payments: Mutex<VecDeque<Option<Vec<PaymentRecord>>>>,
        single: Option<PaymentRecord>,
        donation_calls: AtomicUsize,
        list_calls: AtomicUsize,
        single_calls: AtomicUsize,
    }

    impl FakeSource {
        fn with_payments(script: Vec<Option<Vec<PaymentRecord>>>) -> Self {
            Self {
                payments: Mutex::new(script.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PaymentSource for FakeSource {
        async fn donation(&self, donation_id: &str) -> Result<Donation, ApiError> {
            self.donation_calls.fetch_add(1, Ordering::SeqCst);
            self.log.record();
            if self.donation_refused {
                return Err(expired());
            }
            if self.donation_missing {
                return Err(not_found(donation_id));
            }
            Ok(Donation {
                id: donation_id.into(),
                amount: 1000.0,
                currency: "XOF".into(),
                status: None,
                campaign_id: None,
                created_at: None,
            })
        }

        async fn payments_for_donation(
            &self,
            donation_id: &str,
        ) -> Result<Vec<PaymentRecord>, ApiError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.log.record();
            if self.lookups_refused {
                return Err(expired());
            }
            match self.payments.lock().unwrap().pop_front() {
                Some(Some(payments)) => Ok(payments),
                Some(None) => Err(ApiError::Network {
                    url: donation_id.into(),
                    message: "connection reset".into(),
                }),
                None => Ok(Vec::new()),
            }
        }

        async fn payment(&self, payment_id: &str) -> Result<PaymentRecord, ApiError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            self.log.record();
            if self.lookups_refused {
                return Err(expired());
            }
            self.single.clone().ok_or_else(|| not_found(payment_id))
        }
    }

    struct FakeVerifier {
        status: Option<&'static str>,
        calls: AtomicUsize,
        log: Arc<StateLog>,
    }

    impl FakeVerifier {
        fn new(status: Option<&'static str>) -> Arc<Self> {
            Self::logging(status, Arc::default())
        }

        fn logging(status: Option<&'static str>, log: Arc<StateLog>) -> Arc<Self> {
            Arc::new(Self {
                status,
                calls: AtomicUsize::new(0),
                log,
            })
        }
    }

    #[async_trait]
    impl ProviderVerifier for FakeVerifier {
        async fn verify(&self, _token: &str) -> Result<ProviderStatus, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.record();
            match self.status {
                Some(s) => Ok(ProviderStatus(s.into())),
                None => Err(ApiError::ProviderVerification("HTTP 502".into())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    /// Cancels the run from inside the first backoff, then never wakes.
    struct CancellingSleeper(CancellationToken);

    #[async_trait]
    impl Sleeper for CancellingSleeper {
        async fn sleep(&self, _duration: Duration) {
            self.0.cancel();
            std::future::pending::<()>().await;
        }
    }

    fn reconciler(source: Arc<FakeSource>, sleeper: Arc<RecordingSleeper>) -> Reconciler {
        Reconciler::new(source, RetryPolicy::default()).with_sleeper(sleeper)
    }

    fn donation_input() -> ReconcileInput {
        ReconcileInput::Donation {
            donation_id: "d1".into(),
            payment_id: None,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(3000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(5000));
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = RetryPolicy::from_settings(&ReconcileSettings {
            max_attempts: 0,
            backoff_unit_ms: 10,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_before(2), Duration::from_millis(30));
    }

    #[test]
    fn test_huge_settings_saturate() {
        let policy = RetryPolicy::from_settings(&ReconcileSettings {
            max_attempts: u32::MAX,
            backoff_unit_ms: u64::MAX,
        });
        assert_eq!(policy.delay_before(u32::MAX), Duration::MAX);
        assert_eq!(policy.delay_before(2), Duration::from_millis(u64::MAX) * 3);
    }

    #[tokio::test]
    async fn test_no_payment_after_all_attempts() {
        let source = Arc::new(FakeSource::default());
        let sleeper = Arc::new(RecordingSleeper::default());
        let reconciler = reconciler(source.clone(), sleeper.clone());

        let res = tokio_test::assert_ok!(
            reconciler
                .run(&donation_input(), &CancellationToken::new())
                .await
        );
        assert_eq!(res.outcome, Outcome::NoPaymentFound);
        assert_ne!(res.outcome, Outcome::Failed);
        assert_eq!(res.attempts, 3);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(3000), Duration::from_millis(5000)]
        );
        assert_eq!(reconciler.state(), ReconcileState::Resolved(res));
    }

    #[tokio::test]
    async fn test_payment_appears_on_second_attempt() {
        let source = Arc::new(FakeSource::with_payments(vec![
            Some(vec![]),
            Some(vec![payment(
                "p1",
                "stripe",
                PaymentStatus::Completed,
                "2024-06-01T10:00:00Z",
            )]),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let reconciler = reconciler(source.clone(), sleeper.clone());

        let res = reconciler
            .run(&donation_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::Success);
        assert_eq!(res.source, Some(StatusSource::Cached));
        assert_eq!(res.attempts, 2);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(3000)]
        );
    }

    #[tokio::test]
    async fn test_moneyfusion_paid_overrides_cached() {
        let source = Arc::new(FakeSource::with_payments(vec![Some(vec![payment(
            "p1",
            MONEYFUSION,
            PaymentStatus::Failed,
            "2024-06-01T10:00:00Z",
        )])]));
        let verifier = FakeVerifier::new(Some("paid"));
        let reconciler = reconciler(source, Arc::new(RecordingSleeper::default()))
            .with_verifier(verifier.clone());

        let res = reconciler
            .run(&donation_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::Success);
        assert_eq!(res.source, Some(StatusSource::Provider));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_error_falls_back_to_cached() {
        let source = Arc::new(FakeSource::with_payments(vec![Some(vec![payment(
            "p1",
            MONEYFUSION,
            PaymentStatus::Pending,
            "2024-06-01T10:00:00Z",
        )])]));
        let reconciler = reconciler(source, Arc::new(RecordingSleeper::default()))
            .with_verifier(FakeVerifier::new(None));

        let res = reconciler
            .run(&donation_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::Processing);
        assert_eq!(res.source, Some(StatusSource::Cached));
        assert_eq!(res.attempts, 1);
    }

    #[tokio::test]
    async fn test_provider_unknown_status_is_informational() {
        let source = Arc::new(FakeSource::with_payments(vec![Some(vec![payment(
            "p1",
            MONEYFUSION,
            PaymentStatus::Pending,
            "2024-06-01T10:00:00Z",
        )])]));
        let reconciler = reconciler(source, Arc::new(RecordingSleeper::default()))
            .with_verifier(FakeVerifier::new(Some("no paid")));

        let res = reconciler
            .run(&donation_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::Informational("no paid".into()));
    }

    #[tokio::test]
    async fn test_other_provider_skips_verification() {
        let source = Arc::new(FakeSource::with_payments(vec![Some(vec![payment(
            "p1",
            "stripe",
            PaymentStatus::Expired,
            "2024-06-01T10:00:00Z",
        )])]));
        let verifier = FakeVerifier::new(Some("paid"));
        let reconciler = reconciler(source, Arc::new(RecordingSleeper::default()))
            .with_verifier(verifier.clone());

        let res = reconciler
            .run(&donation_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::Failed);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_latest_payment_is_reconciled() {
        let source = Arc::new(FakeSource::with_payments(vec![Some(vec![
            payment("old", "stripe", PaymentStatus::Failed, "2024-06-01T10:00:00Z"),
            payment("new", "stripe", PaymentStatus::Paid, "2024-06-02T10:00:00Z"),
            payment("mid", "stripe", PaymentStatus::Cancelled, "2024-06-01T18:00:00Z"),
        ])]));
        let reconciler = reconciler(source, Arc::new(RecordingSleeper::default()));

        let res = reconciler
            .run(&donation_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.payment.unwrap().id, "new");
        assert_eq!(res.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_missing_donation_stops_immediately() {
        let source = Arc::new(FakeSource {
            donation_missing: true,
            ..Default::default()
        });
        let sleeper = Arc::new(RecordingSleeper::default());
        let reconciler = reconciler(source.clone(), sleeper.clone());

        let res = reconciler
            .run(&donation_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::DonationNotFound);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_on_donation_lookup() {
        let source = Arc::new(FakeSource {
            donation_refused: true,
            ..Default::default()
        });
        let sleeper = Arc::new(RecordingSleeper::default());
        let reconciler = reconciler(source.clone(), sleeper.clone());

        let res = reconciler
            .run(&donation_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::SignedOut);
        assert_eq!(res.attempts, 0);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_on_payment_lookup_stops_polling() {
        let source = Arc::new(FakeSource {
            lookups_refused: true,
            ..Default::default()
        });
        let sleeper = Arc::new(RecordingSleeper::default());
        let reconciler = reconciler(source.clone(), sleeper.clone());

        let input = ReconcileInput::Donation {
            donation_id: "d1".into(),
            payment_id: Some("p1".into()),
        };
        let res = reconciler
            .run(&input, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::SignedOut);
        assert_eq!(res.attempts, 1);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.single_calls.load(Ordering::SeqCst), 0);
        assert!(sleeper.delays.lock().unwrap().is_empty());

        let by_payment = ReconcileInput::DeepLink(PaymentLink {
            transaction_id: "T1".into(),
            status: "pending".into(),
            donation_id: None,
            payment_id: Some("p1".into()),
        });
        let res = reconciler
            .run(&by_payment, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::SignedOut);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_published_states_follow_each_attempt() {
        let log = Arc::new(StateLog::default());
        let source = Arc::new(FakeSource {
            payments: Mutex::new(
                vec![
                    Some(vec![]),
                    Some(vec![payment(
                        "p1",
                        MONEYFUSION,
                        PaymentStatus::Pending,
                        "2024-06-01T10:00:00Z",
                    )]),
                ]
                .into(),
            ),
            log: log.clone(),
            ..Default::default()
        });
        let reconciler = reconciler(source, Arc::new(RecordingSleeper::default()))
            .with_verifier(FakeVerifier::logging(Some("paid"), log.clone()));
        log.watch(&reconciler);
        assert_eq!(reconciler.state(), ReconcileState::Idle);

        let res = reconciler
            .run(&donation_input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            *log.seen.lock().unwrap(),
            vec![
                // donation lookup, then one payment lookup per attempt
                ReconcileState::Fetching { attempt: 1 },
                ReconcileState::Fetching { attempt: 1 },
                ReconcileState::Fetching { attempt: 2 },
                ReconcileState::Verifying { attempt: 2 },
            ]
        );
        assert_eq!(res.attempts, 2);
        assert_eq!(res.outcome, Outcome::Success);
        assert_eq!(reconciler.state(), ReconcileState::Resolved(res));
    }

    #[tokio::test]
    async fn test_single_payment_fallback_on_lookup_error() {
        let source = Arc::new(FakeSource {
            payments: Mutex::new(vec![None].into()),
            single: Some(payment(
                "p7",
                "stripe",
                PaymentStatus::Processing,
                "2024-06-01T10:00:00Z",
            )),
            ..Default::default()
        });
        let reconciler = reconciler(source.clone(), Arc::new(RecordingSleeper::default()));

        let input = ReconcileInput::Donation {
            donation_id: "d1".into(),
            payment_id: Some("p7".into()),
        };
        let res = reconciler
            .run(&input, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.outcome, Outcome::Processing);
        assert_eq!(res.attempts, 1);
        assert_eq!(source.single_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deep_link_inputs() {
        let source = Arc::new(FakeSource {
            single: Some(payment(
                "p2",
                "stripe",
                PaymentStatus::Completed,
                "2024-06-01T10:00:00Z",
            )),
            ..Default::default()
        });
        let reconciler = reconciler(source.clone(), Arc::new(RecordingSleeper::default()));
        let cancel = CancellationToken::new();

        let by_payment = ReconcileInput::DeepLink(PaymentLink {
            transaction_id: "T1".into(),
            status: "pending".into(),
            donation_id: None,
            payment_id: Some("p2".into()),
        });
        let res = reconciler.run(&by_payment, &cancel).await.unwrap();
        assert_eq!(res.outcome, Outcome::Success);
        assert_eq!(source.donation_calls.load(Ordering::SeqCst), 0);

        let status_only = ReconcileInput::DeepLink(PaymentLink {
            transaction_id: "T1".into(),
            status: "cancelled".into(),
            donation_id: None,
            payment_id: None,
        });
        let res = reconciler.run(&status_only, &cancel).await.unwrap();
        assert_eq!(res.outcome, Outcome::Failed);
        assert_eq!(res.source, Some(StatusSource::DeepLink));
        assert_eq!(res.attempts, 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let source = Arc::new(FakeSource::default());
        let reconciler = Reconciler::new(source.clone(), RetryPolicy::default())
            .with_sleeper(Arc::new(CancellingSleeper(cancel.clone())));

        let err = reconciler.run(&donation_input(), &cancel).await.unwrap_err();
        assert_eq!(err, Cancelled);
        assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.state(), ReconcileState::Idle);
    }

    #[tokio::test]
    async fn test_manual_retry_restarts_from_first_attempt() {
        let source = Arc::new(FakeSource::with_payments(vec![
            Some(vec![]),
            Some(vec![]),
            Some(vec![]),
            Some(vec![payment(
                "p1",
                "stripe",
                PaymentStatus::Paid,
                "2024-06-01T10:00:00Z",
            )]),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let reconciler = reconciler(source, sleeper.clone());
        let mut states = reconciler.subscribe();
        let cancel = CancellationToken::new();

        let first = reconciler.run(&donation_input(), &cancel).await.unwrap();
        assert_eq!(first.outcome, Outcome::NoPaymentFound);

        let retry = reconciler.run(&donation_input(), &cancel).await.unwrap();
        assert_eq!(retry.outcome, Outcome::Success);
        assert_eq!(retry.attempts, 1);
        assert_eq!(sleeper.delays.lock().unwrap().len(), 2);

        assert!(states.has_changed().unwrap());
        assert!(matches!(
            &*states.borrow_and_update(),
            ReconcileState::Resolved(r) if r.outcome == Outcome::Success
        ));
    }
}
