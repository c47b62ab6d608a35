//! Query input types.
//!
//! A [`Query`] is the immutable per-request input to the orchestration core:
//! raw text, prior conversation turns, the user's entitlement tier, and any
//! attached media references.  It is created once per request and never
//! mutated.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::Message;

/// The caller's entitlement level, in ascending order of privilege.
///
/// Higher tiers may start at stronger model tiers and unlock gated tools
/// (web search requires `Premium`, CRM access requires `Internal`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    /// Default entitlement.
    #[default]
    Standard,
    /// Paying customer: unlocks web search and a stronger starting tier.
    Premium,
    /// Internal operator: unlocks CRM access and every tool.
    Internal,
}

impl std::str::FromStr for UserTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "premium" => Ok(Self::Premium),
            "internal" => Ok(Self::Internal),
            _ => Err(format!(
                "invalid user tier `{s}`, expected: standard, premium, internal"
            )),
        }
    }
}

/// Reference to an attached media payload (image URL or inline base64).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    /// Where the payload lives (URL or data URI).
    pub location: String,

    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
}

impl MediaRef {
    /// Reference an image by URL, guessing the MIME type from the extension
    /// (defaults to `image/png`).
    pub fn url(location: impl Into<String>) -> Self {
        let location = location.into();
        let mime_type = match location.rsplit('.').next() {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "image/png",
        };
        Self {
            location,
            mime_type: mime_type.to_owned(),
        }
    }
}

/// The immutable input for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Correlation id for logs and the persistence sink.
    pub id: Uuid,

    /// The raw user question.
    pub text: String,

    /// Prior conversation turns, oldest first.
    #[serde(default)]
    pub history: Vec<Message>,

    /// The caller's entitlement level.
    #[serde(default)]
    pub user_tier: UserTier,

    /// Attached media references, if any.
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

impl Query {
    /// Create a query with no history or media.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            text: text.into(),
            history: Vec::new(),
            user_tier: UserTier::default(),
            media: Vec::new(),
        }
    }

    /// Builder: attach prior conversation turns.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Builder: set the user's entitlement tier.
    pub fn with_user_tier(mut self, tier: UserTier) -> Self {
        self.user_tier = tier;
        self
    }

    /// Builder: attach a media reference.
    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media.push(media);
        self
    }
}
