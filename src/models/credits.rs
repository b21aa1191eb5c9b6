//! Session credit balances.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Per-type consultation credits. Stored nested in the user document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Credits {
    #[serde(default)]
    pub chat: u32,
    #[serde(default)]
    pub audio: u32,
    #[serde(default)]
    pub video: u32,
}

impl Credits {
    pub fn get(&self, credit_type: CreditType) -> u32 {
        match credit_type {
            CreditType::Chat => self.chat,
            CreditType::Audio => self.audio,
            CreditType::Video => self.video,
        }
    }

    /// True if at least one consultation type has a balance.
    pub fn has_any(&self) -> bool {
        self.chat > 0 || self.audio > 0 || self.video > 0
    }

    /// True when every balance is zero; drives the "no credits" prompt.
    pub fn is_empty(&self) -> bool {
        !self.has_any()
    }
}

/// Consultation type a credit is spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum CreditType {
    Chat,
    Audio,
    Video,
}

impl CreditType {
    pub const ALL: [CreditType; 3] = [CreditType::Chat, CreditType::Audio, CreditType::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditType::Chat => "chat",
            CreditType::Audio => "audio",
            CreditType::Video => "video",
        }
    }
}

impl fmt::Display for CreditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CreditType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown credit type: {s}"))
    }
}

/// At least one credit of `credit_type` is available.
pub fn has_sufficient_credits(credits: &Credits, credit_type: CreditType) -> bool {
    credits.get(credit_type) > 0
}

/// Whether a consultation of `credit_type` may be started.
pub fn can_start_consultation(credits: &Credits, credit_type: CreditType) -> bool {
    has_sufficient_credits(credits, credit_type)
}
