//! Terms-of-service onboarding gate.
//!
//! Every account must have signed the currently required terms version
//! before gated actions run. The signed version is looked up in a local
//! cache first and the remote service second.

pub mod api;
pub mod guard;
pub mod reconciler;
pub mod store;

use serde::Serialize;

use crate::types::Address;

pub use api::{AccountStatus, HttpOnboardingApi, OnboardingApi, SignChallenge};
pub use guard::{GuardOutcome, GuardedAction};
pub use reconciler::{Callback, OnboardingReconciler};
pub use store::{FileStore, KeyValueStore, MemoryStore, SignedVersionCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "version", rename_all = "snake_case")]
pub enum OnboardingStatus {
    /// Still loading, or the last lookup failed.
    Unknown,
    NotOnboarded,
    /// Signed at least the required version; holds the signed version.
    Onboarded(u32),
}

impl OnboardingStatus {
    pub fn is_onboarded(self) -> bool {
        matches!(self, Self::Onboarded(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub status: OnboardingStatus,
    pub should_prompt: bool,
}

/// Onboarded iff the account signed `required` or later.
pub fn reconcile(required: u32, onboarded: Option<u32>) -> Decision {
    match onboarded {
        Some(version) if version >= required => Decision {
            status: OnboardingStatus::Onboarded(version),
            should_prompt: false,
        },
        _ => Decision {
            status: OnboardingStatus::NotOnboarded,
            should_prompt: true,
        },
    }
}

/// Observable reconciler state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardingSnapshot {
    pub account: Option<Address>,
    pub required_version: Option<u32>,
    #[serde(flatten)]
    pub status: OnboardingStatus,
    pub modal_open: bool,
    /// Bumped on every account switch.
    pub generation: u64,
}

impl Default for OnboardingSnapshot {
    fn default() -> Self {
        Self {
            account: None,
            required_version: None,
            status: OnboardingStatus::Unknown,
            modal_open: false,
            generation: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_compares_versions() {
        assert_eq!(
            reconcile(3, Some(3)),
            Decision {
                status: OnboardingStatus::Onboarded(3),
                should_prompt: false
            }
        );
        assert_eq!(reconcile(3, Some(4)).status, OnboardingStatus::Onboarded(4));
        assert_eq!(
            reconcile(5, Some(3)),
            Decision {
                status: OnboardingStatus::NotOnboarded,
                should_prompt: true
            }
        );
        assert!(reconcile(1, None).should_prompt);
    }

    #[test]
    fn snapshot_serializes_status_inline() {
        let snapshot = OnboardingSnapshot {
            status: OnboardingStatus::Onboarded(2),
            ..Default::default()
        };
        let json = serde_json::to_value(&snapshot).expect("json");
        assert_eq!(json["status"], "onboarded");
        assert_eq!(json["version"], 2);
        assert_eq!(json["modal_open"], false);
    }
}
