use futures::StreamExt;
use log::{debug, info};
use serde::Serialize;

use super::{settle, Phase, Synced};
use crate::actions::{self, Notice, PendingDelete};
use crate::api::{ApiClient, PipelineDetail};
use crate::error::Result;
use crate::events::{Event, EventStream, Subscription, SubscriptionManager};
use crate::guard::{self, Route};

/// Snapshot behind the pipeline detail view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Detail {
    /// `None` when the pipeline could not be loaded.
    pub pipeline: Option<PipelineDetail>,
    /// Log of the latest build: the fetched lines plus any streamed since.
    pub logs: Vec<String>,
}

/// One pipeline with its configuration, history and a live log tail.
pub struct DetailView {
    id: u64,
    api: ApiClient,
    state: Synced<Detail>,
    events: Option<EventStream>,
}

impl DetailView {
    pub async fn mount(
        api: ApiClient,
        id: u64,
        subscriptions: Option<&SubscriptionManager>,
    ) -> Result<Self> {
        guard::require(api.session(), Route::PipelineDetail(id))?;

        let events = subscriptions
            .map(|manager| manager.subscribe(api.session()).map(Subscription::into_stream))
            .transpose()?;

        let view = Self {
            id,
            api,
            state: Synced::new(),
            events,
        };
        info!("Mounted detail view for pipeline {id}");

        view.refresh().await?;
        Ok(view)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Refetch the pipeline. Streamed log lines are replaced by the fetched
    /// log.
    pub async fn refresh(&self) -> Result<bool> {
        let Some(ticket) = self.state.begin() else {
            return Ok(false);
        };

        let mut rejected = None;
        let pipeline = settle(
            self.api.pipeline(self.id).await.map(Some),
            "pipeline",
            &mut rejected,
        );
        let logs = pipeline
            .as_ref()
            .map(|p: &PipelineDetail| p.logs.clone())
            .unwrap_or_default();

        let applied = self.state.apply(ticket, Detail { pipeline, logs });
        match rejected {
            Some(e) => Err(e),
            None => Ok(applied),
        }
    }

    /// Append log lines as they stream in; refetch on status changes.
    pub async fn handle(&self, event: &Event) -> Result<()> {
        match event {
            Event::BuildLog(line) => {
                self.state.modify(|detail| detail.logs.push(line.clone()));
            }
            _ if event.invalidates_snapshot() => {
                self.refresh().await?;
            }
            _ => {}
        }
        Ok(())
    }

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

    pub fn snapshot(&self) -> Detail {
        self.state.snapshot()
    }

    pub fn pipeline(&self) -> Option<PipelineDetail> {
        self.state.read(|detail| detail.pipeline.clone())
    }

    pub fn is_missing(&self) -> bool {
        self.phase() == Phase::Ready && self.state.read(|detail| detail.pipeline.is_none())
    }

    pub async fn run(&self) -> Result<Notice> {
        let notice = actions::run_pipeline(&self.api, self.id).await?;
        if notice.is_success() {
            self.refresh().await?;
        }
        Ok(notice)
    }

    pub fn request_delete(&self) -> PendingDelete {
        actions::request_delete(self.id)
    }

    /// Delete this pipeline. On success the view stops syncing and the notice
    /// points back to the pipeline list.
    pub async fn confirm_delete(&mut self, pending: PendingDelete) -> Result<Notice> {
        let notice = actions::delete_pipeline(&self.api, pending).await?;
        if !notice.is_success() {
            return Ok(notice);
        }

        self.release();
        Ok(notice.then(Route::Pipelines))
    }

    pub fn unmount(self) {}

    fn release(&mut self) {
        self.state.detach();
        if self.events.take().is_some() {
            debug!("Released detail subscription for pipeline {}", self.id);
        }
    }
}

impl Drop for DetailView {
    fn drop(&mut self) {
        self.release();
    }
}
