//! Controller error types.

use std::time::Duration;

use confroll_reconcile::OwnerKey;
use thiserror::Error;

/// A campaign that stopped before finishing its batches.
///
/// Both variants leave the second batch untouched. Neither is retried: the
/// next change to the ConfigMap starts a fresh campaign.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// First-batch replacements did not become ready before the deadline.
    #[error("replacements for {} owner(s) not ready after {waited:?}", pending_owners.len())]
    ReplacementsUnhealthy {
        pending_owners: Vec<OwnerKey>,
        waited: Duration,
    },

    /// Shutdown was requested mid-campaign.
    #[error("campaign cancelled by shutdown")]
    Cancelled,
}

/// Errors surfaced by the ConfigMap reconciler.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("restart campaign for {source_key} failed: {error}")]
    Campaign {
        source_key: String,
        #[source]
        error: CampaignError,
    },

    #[error("cluster access failed: {0}")]
    Cluster(#[source] anyhow::Error),
}

impl ControllerError {
    /// Whether this error aborted or cancelled a campaign.
    pub fn campaign_error(&self) -> Option<&CampaignError> {
        match self {
            Self::Campaign { error, .. } => Some(error),
            _ => None,
        }
    }
}
