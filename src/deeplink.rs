//! Deep link resolution
//!
//! Turns app-launch URLs such as
//! `donate://payment/return?transactionId=T1&status=paid&donationId=D1`
//! into typed navigation intents.

use std::collections::BTreeMap;

use url::Url;

/// What a deep link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Payment,
    Donation,
    Other,
}

/// A parsed deep link, kept until a screen consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkIntent {
    pub url: String,
    pub kind: LinkKind,
    pub scheme: String,
    /// Host followed by path segments, empty ones dropped
    pub segments: Vec<String>,
    pub params: BTreeMap<String, String>,
}

/// Payment return parameters carried by a payment deep link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLink {
    pub transaction_id: String,
    pub status: String,
    pub donation_id: Option<String>,
    pub payment_id: Option<String>,
}

/// Parse a URL into a deep link intent. Never fails: malformed input
/// yields `LinkKind::Other` with no parameters.
pub fn resolve(raw: &str) -> DeepLinkIntent {
    let url = match Url::parse(raw.trim()) {
        Ok(url) => url,
        Err(e) => {
            tracing::debug!("Unparseable deep link {:?}: {}", raw, e);
            return DeepLinkIntent {
                url: raw.to_string(),
                kind: LinkKind::Other,
                scheme: String::new(),
                segments: Vec::new(),
                params: BTreeMap::new(),
            };
        }
    };

    let mut segments: Vec<String> = Vec::new();
    if let Some(host) = url.host_str() {
        segments.push(host.to_string());
    }
    match url.path_segments() {
        Some(parts) => segments.extend(parts.map(String::from)),
        // cannot-be-a-base URLs such as `donate:payment`
        None => segments.extend(url.path().split('/').map(String::from)),
    }
    segments.retain(|s| !s.is_empty());

    let params: BTreeMap<String, String> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    DeepLinkIntent {
        url: raw.to_string(),
        kind: classify(&segments),
        scheme: url.scheme().to_string(),
        segments,
        params,
    }
}

fn classify(segments: &[String]) -> LinkKind {
    let lowered: Vec<String> = segments.iter().map(|s| s.to_lowercase()).collect();
    if lowered.iter().any(|s| s.contains("payment")) {
        LinkKind::Payment
    } else if lowered.iter().any(|s| s.contains("donation")) {
        LinkKind::Donation
    } else {
        LinkKind::Other
    }
}

impl DeepLinkIntent {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Payment return parameters, if this is a valid payment link.
    ///
    /// A payment link without `transactionId` or `status` is logged and
    /// yields `None`; the intent itself stays usable.
    pub fn payment_link(&self) -> Option<PaymentLink> {
        if self.kind != LinkKind::Payment {
            return None;
        }
        let (Some(transaction_id), Some(status)) =
            (self.param("transactionId"), self.param("status"))
        else {
            tracing::warn!(
                "Payment deep link missing transactionId or status: {}",
                self.url
            );
            return None;
        };

        Some(PaymentLink {
            transaction_id: transaction_id.to_string(),
            status: status.to_string(),
            donation_id: self.param("donationId").map(String::from),
            payment_id: self.param("paymentId").map(String::from),
        })
    }

    /// Donation id for donation links: `donationId`/`id` query parameter,
    /// else the segment following the `donation` segment.
    pub fn donation_id(&self) -> Option<String> {
        if let Some(id) = self.param("donationId").or_else(|| self.param("id")) {
            return Some(id.to_string());
        }
        let pos = self
            .segments
            .iter()
            .position(|s| s.to_lowercase().contains("donation"))?;
        self.segments.get(pos + 1).cloned()
    }
}

/// Holds the most recent deep link until it is consumed.
#[derive(Debug, Default)]
pub struct DeepLinkInbox {
    /// Only links of this scheme are accepted when set
    scheme: Option<String>,
    pending: Option<DeepLinkIntent>,
}

impl DeepLinkInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inbox that drops links not addressed to `scheme`.
    pub fn for_scheme(scheme: &str) -> Self {
        Self {
            scheme: Some(scheme.to_string()),
            pending: None,
        }
    }

    /// Resolve and hold `url`, replacing any unconsumed link. A link of a
    /// foreign scheme is dropped and leaves the pending link in place.
    pub fn receive(&mut self, url: &str) -> Option<&DeepLinkIntent> {
        let intent = resolve(url);
        if let Some(ref scheme) = self.scheme {
            if !intent.scheme.eq_ignore_ascii_case(scheme) {
                tracing::warn!("Ignoring deep link not addressed to {}://: {}", scheme, url);
                return None;
            }
        }
        tracing::info!("Received deep link ({:?}): {}", intent.kind, intent.url);
        Some(self.pending.insert(intent))
    }

    pub fn peek(&self) -> Option<&DeepLinkIntent> {
        self.pending.as_ref()
    }

    /// Consume the pending link.
    pub fn take(&mut self) -> Option<DeepLinkIntent> {
        self.pending.take()
    }
}
