//! services/api/src/pipeline/sweeper.rs
//!
//! Background recovery of zombie stories. A story left `pending` past the
//! threshold means its generation task died without reaching a terminal
//! state (process restart, task panic); the sweeper periodically scans for
//! those rows and re-runs generation through the regular pipeline, with a
//! per-story ceiling on automatic attempts.

use crate::config::SweeperSettings;
use crate::pipeline::story_service::StoryService;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use storyweaver_core::domain::StoryStatus;
use storyweaver_core::ports::DatabaseService;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct RecoverySweeper {
    service: Arc<StoryService>,
    db: Arc<dyn DatabaseService>,
    settings: SweeperSettings,
    /// Automatic recovery attempts per story, kept in memory. A restart resets
    /// the counts, which is acceptable: the worst case is a few extra
    /// recoveries after a redeploy.
    attempts: Mutex<HashMap<Uuid, u32>>,
}

impl RecoverySweeper {
    pub fn new(
        service: Arc<StoryService>,
        db: Arc<dyn DatabaseService>,
        settings: SweeperSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            service,
            db,
            settings,
            attempts: Mutex::new(HashMap::new()),
        })
    }

    /// Scans on a fixed interval until the token is cancelled. Meant to be
    /// spawned once at startup.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.settings.check_interval.as_millis() as u64,
            threshold_ms = self.settings.zombie_threshold.as_millis() as u64,
            "Recovery sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Recovery sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let recovered = self.sweep_once(Utc::now()).await;
                    if recovered > 0 {
                        info!(recovered, "Sweep recovered zombie stories");
                    }
                }
            }
        }
    }

    /// One scan-and-recover pass as of `now`. Returns how many stories were
    /// recovered to a terminal state.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let cutoff =
            now - chrono::Duration::milliseconds(self.settings.zombie_threshold.as_millis() as i64);
        let stale = match self.db.get_stale_pending_stories(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                error!(error = %e, "Zombie scan failed");
                return 0;
            }
        };

        let mut recovered = 0;
        let mut attempted = 0;
        for story in &stale {
            // Claim the attempt before starting, so a crash mid-recovery still
            // counts against the ceiling.
            {
                let mut attempts = self.attempts.lock().unwrap();
                let count = attempts.entry(story.id).or_insert(0);
                if *count >= self.settings.max_auto_retries {
                    warn!(
                        story_id = %story.id,
                        attempts = *count,
                        "Auto-recovery ceiling reached, leaving story for manual retry"
                    );
                    continue;
                }
                *count += 1;
            }

            // Recoveries run sequentially with a pause, whether or not the
            // previous one succeeded; a sweep is not a burst of provider calls.
            if attempted > 0 {
                tokio::time::sleep(self.settings.pause_between).await;
            }
            attempted += 1;

            let age_ms = (now - story.created_at).num_milliseconds();
            info!(story_id = %story.id, age_ms, "Recovering zombie story");
            match self.service.recover_story(story.id).await {
                Ok(()) => recovered += 1,
                Err(e) => {
                    warn!(story_id = %story.id, error = %e, "Zombie recovery failed");
                }
            }
        }

        self.prune_settled_counters().await;
        recovered
    }

    /// Drops attempt counters for stories that are no longer pending, so the
    /// map does not grow with every story that ever went through recovery.
    async fn prune_settled_counters(&self) {
        let tracked: Vec<Uuid> = self.attempts.lock().unwrap().keys().copied().collect();
        for id in tracked {
            let settled = match self.db.get_story_by_id(id).await {
                Ok(story) => story.status != StoryStatus::Pending,
                Err(_) => true,
            };
            if settled {
                self.attempts.lock().unwrap().remove(&id);
            }
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}
