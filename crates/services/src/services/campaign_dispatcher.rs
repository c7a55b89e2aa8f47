//! Background loop that starts scheduled campaigns and delivers queued email.

use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::campaigns::{CampaignError, CampaignService};

pub struct CampaignDispatcher {
    campaigns: CampaignService,
    poll_interval: Duration,
}

impl CampaignDispatcher {
    pub fn spawn(campaigns: CampaignService, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        let dispatcher = Self {
            campaigns,
            poll_interval,
        };
        tokio::spawn(async move {
            dispatcher.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting campaign dispatcher with interval {:?}",
            self.poll_interval
        );

        // tokio panics on a zero period.
        let mut interval = interval(self.poll_interval.max(Duration::from_secs(1)));

        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                error!("Error dispatching campaigns: {}", e);
            }
        }
    }

    /// One pass: promote due campaigns, then drain every sending one.
    /// A failing campaign is logged and skipped.
    pub async fn tick(&self) -> Result<(), CampaignError> {
        let started = self.campaigns.start_due(Utc::now()).await?;
        if started > 0 {
            info!(started, "Scheduled campaigns started");
        }

        let sending = self.campaigns.sending().await?;
        if sending.is_empty() {
            debug!("Campaign dispatcher: nothing to send");
            return Ok(());
        }

        for campaign in sending {
            match self.campaigns.drain(&campaign).await {
                Ok(outcome) => {
                    debug!(
                        campaign_id = %campaign.id,
                        sent = outcome.sent,
                        failed = outcome.failed,
                        unrecorded = outcome.unrecorded,
                        expired = outcome.expired,
                        settled = ?outcome.settled,
                        "Campaign drained"
                    );
                }
                Err(e) => {
                    warn!(
                        campaign_id = %campaign.id,
                        error = %e,
                        "Error draining campaign"
                    );
                }
            }
        }

        Ok(())
    }
}
