use futures::StreamExt;
use log::{debug, info};
use serde::Serialize;

use super::{settle, Phase, Synced};
use crate::actions::{self, Notice, PendingDelete};
use crate::api::{ApiClient, Build, Pipeline};
use crate::error::Result;
use crate::events::{Event, EventStream, Subscription, SubscriptionManager};
use crate::guard::{self, Route};
use crate::stats::{self, DashboardStats, Insight, Rates, StatusCounts};
use crate::views::{self, StatusFilter};

/// Snapshot behind the dashboard and the pipeline list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Board {
    pub pipelines: Vec<Pipeline>,
    pub builds: Vec<Build>,
}

/// Everything the dashboard shows, derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardReport {
    pub stats: DashboardStats,
    pub rates: Rates,
    pub insights: Vec<Insight>,
    /// Status breakdown of the builds the server returned.
    pub builds: StatusCounts,
    pub recent_builds: Vec<Build>,
}

/// Pipelines and recent builds for one session, kept current by refetching on
/// demand and on push notifications.
///
/// There is no timer: after the initial load, only [`BoardView::refresh`] and
/// status notifications refetch.
pub struct BoardView {
    api: ApiClient,
    state: Synced<Board>,
    events: Option<EventStream>,
}

impl BoardView {
    /// Mount the view for `route`: check the session, subscribe to push
    /// notifications when `subscriptions` is given, then load both
    /// collections.
    ///
    /// # Errors
    ///
    /// - [`crate::error::PipewatchError::Unauthenticated`] without a credential
    /// - [`crate::error::PipewatchError::Unauthorized`] if the server rejects it
    pub async fn mount(
        api: ApiClient,
        route: Route,
        subscriptions: Option<&SubscriptionManager>,
    ) -> Result<Self> {
        guard::require(api.session(), route)?;

        // Subscribe first so nothing slips between the load and the listener
        let events = subscriptions
            .map(|manager| manager.subscribe(api.session()).map(Subscription::into_stream))
            .transpose()?;

        let view = Self {
            api,
            state: Synced::new(),
            events,
        };
        info!("Mounted {route:?} view");

        view.refresh().await?;
        Ok(view)
    }

    /// Refetch pipelines and builds concurrently and replace the snapshot.
    ///
    /// A failed read shows up as an empty collection. Returns whether this
    /// result was applied; it is not if a newer refetch won or the view was
    /// unmounted.
    pub async fn refresh(&self) -> Result<bool> {
        let Some(ticket) = self.state.begin() else {
            return Ok(false);
        };

        let (pipelines, builds) =
            tokio::join!(self.api.list_pipelines(), self.api.list_builds());

        let mut rejected = None;
        let board = Board {
            pipelines: settle(pipelines, "pipelines", &mut rejected),
            builds: settle(builds, "builds", &mut rejected),
        };
        debug!(
            "Fetched {} pipelines and {} builds",
            board.pipelines.len(),
            board.builds.len()
        );

        let applied = self.state.apply(ticket, board);
        match rejected {
            Some(e) => Err(e),
            None => Ok(applied),
        }
    }

    /// React to a push notification. Status changes refetch; log lines are
    /// not part of this view.
    pub async fn handle(&self, event: &Event) -> Result<()> {
        if event.invalidates_snapshot() {
            self.refresh().await?;
        }
        Ok(())
    }

    /// Wait for the next push notification and apply it.
    ///
    /// `None` when the view has no subscription or the channel closed.
    pub async fn next_event(&mut self) -> Option<Result<Event>> {
        let event = self.events.as_mut()?.next().await?;
        Some(self.handle(&event).await.map(|()| event))
    }

    pub fn is_live(&self) -> bool {
        self.events.is_some()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn snapshot(&self) -> Board {
        self.state.snapshot()
    }

    pub fn pipelines(&self, filter: StatusFilter) -> Vec<Pipeline> {
        self.state
            .read(|board| views::filter_pipelines(&board.pipelines, filter))
    }

    pub fn stats(&self) -> DashboardStats {
        self.state
            .read(|board| DashboardStats::from_pipelines(&board.pipelines))
    }

    pub fn pipeline_counts(&self) -> StatusCounts {
        self.state
            .read(|board| StatusCounts::of_pipelines(&board.pipelines))
    }

    pub fn build_counts(&self) -> StatusCounts {
        self.state.read(|board| StatusCounts::of_builds(&board.builds))
    }

    /// Execution rates over the pipelines' current status, the same counts
    /// the headline numbers use.
    pub fn rates(&self) -> Rates {
        Rates::from_counts(&self.pipeline_counts())
    }

    pub fn recent_builds(&self) -> Vec<Build> {
        self.state.read(|board| views::recent_builds(&board.builds))
    }

    pub fn report(&self) -> DashboardReport {
        let stats = self.stats();
        let rates = self.rates();
        DashboardReport {
            stats,
            rates,
            insights: stats::insights(&stats, &rates),
            builds: self.build_counts(),
            recent_builds: self.recent_builds(),
        }
    }

    /// Trigger a run and refetch right away, since its status changes.
    pub async fn run_pipeline(&self, id: u64) -> Result<Notice> {
        let notice = actions::run_pipeline(&self.api, id).await?;
        if notice.is_success() {
            self.refresh().await?;
        }
        Ok(notice)
    }

    pub fn request_delete(&self, id: u64) -> PendingDelete {
        actions::request_delete(id)
    }

    /// Delete a confirmed pipeline and drop it from the snapshot immediately,
    /// without waiting for a refetch.
    pub async fn confirm_delete(&self, pending: PendingDelete) -> Result<Notice> {
        let id = pending.id();
        let notice = actions::delete_pipeline(&self.api, pending).await?;
        if notice.is_success() {
            self.state
                .modify(|board| board.pipelines.retain(|p| p.id != id));
        }
        Ok(notice)
    }

    /// Release the subscription; results still in flight are dropped.
    pub fn unmount(self) {}
}

impl Drop for BoardView {
    fn drop(&mut self) {
        self.state.detach();
        if self.events.take().is_some() {
            debug!("Released board subscription");
        }
    }
}
