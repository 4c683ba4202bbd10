use log::debug;
use serde::Serialize;

use crate::error::{PipewatchError, Result};
use crate::session::Session;

/// Views the client can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Login,
    Dashboard,
    Pipelines,
    PipelineDetail(u64),
    NewPipeline,
    Builds,
    BuildLogs(u64),
    Activity,
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Render,
    RedirectToLogin,
}

impl Route {
    pub fn access(self) -> Access {
        match self {
            Self::Login => Access::Public,
            _ => Access::Protected,
        }
    }
}

/// Decides whether `route` may render.
///
/// Only the presence of a credential is checked. Whether the server still
/// accepts it is discovered on the first request that comes back 401.
pub fn check(session: &Session, route: Route) -> GuardDecision {
    if route.access() == Access::Public || session.is_authenticated() {
        return GuardDecision::Render;
    }

    debug!("No credential for {route:?}, redirecting to login");
    session.require_login();
    GuardDecision::RedirectToLogin
}

/// [`check`] as a `Result`, for callers that bail out on redirect.
pub fn require(session: &Session, route: Route) -> Result<()> {
    match check(session, route) {
        GuardDecision::Render => Ok(()),
        GuardDecision::RedirectToLogin => Err(PipewatchError::Unauthenticated),
    }
}
