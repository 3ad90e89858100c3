//! Server-side query planner, subscription manager, and mutation dispatcher
//! (§4.4, §4.5, §4.6) plus the axum transport surface that drives them.

mod authorization;
mod engine;
mod error;
mod http;
mod planner;
mod route;
mod sorting;
mod subscriptions;

pub use authorization::{AuthContext, AuthDecision, Authorization, OpenAuthorization, UpdateAuthorization};
pub use engine::SyncEngine;
pub use error::{ErrorCode, ServerError};
pub use http::routes;
pub use planner::{build_plan, run_query, PlanStep, StorageBatcher};
pub use route::{CustomProcedure, EntityStorage, Route};
pub use subscriptions::{ServerMutation, SubscriptionHandle, SubscriptionManager};
