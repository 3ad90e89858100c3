use serde_json::Value as JsonValue;
use sync_wire::WhereClause;

/// A route's authorization hook returns either a flat allow/deny or a
/// `WhereClause` that gets AND-ed into storage fetches / checked against the
/// entity in question (§4.4 Authorization, §4.6 `handleMutation`).
#[derive(Debug, Clone)]
pub enum AuthDecision {
    Allow,
    Deny,
    Where(WhereClause),
}

impl AuthDecision {
    /// Evaluate this decision against a materialized entity: `Allow` always
    /// passes, `Deny` always fails, `Where` passes only if the clause
    /// matches.
    pub fn permits(&self, entity: &JsonValue) -> bool {
        match self {
            AuthDecision::Allow => true,
            AuthDecision::Deny => false,
            AuthDecision::Where(clause) => clause.matches(entity),
        }
    }

    /// `Some(where)` when this decision should be AND-ed into a storage
    /// fetch rather than checked after the fact.
    pub fn as_where(&self) -> Option<&WhereClause> {
        match self {
            AuthDecision::Where(clause) => Some(clause),
            _ => None,
        }
    }
}

/// Per-request authorization context. Deliberately minimal — the identity
/// and claims an embedding application cares about are its own concern; the
/// planner and dispatcher only need *a* context to pass through to these
/// hooks unopened.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub claims: JsonValue,
}

pub trait UpdateAuthorization: Send + Sync {
    fn pre_mutation(&self, ctx: &AuthContext, preview: &JsonValue) -> AuthDecision;
    fn post_mutation(&self, ctx: &AuthContext, updated: &JsonValue) -> AuthDecision;
}

/// A route's `{ insert, update: { preMutation, postMutation }, read }`
/// authorization triad (§4.4, §4.6). Each hook defaults to `Allow` so a
/// route that declares none of them is open, matching the spec's framing
/// of authorization as opt-in per route.
pub trait Authorization: Send + Sync {
    fn insert(&self, ctx: &AuthContext, preview: &JsonValue) -> AuthDecision {
        let _ = (ctx, preview);
        AuthDecision::Allow
    }

    fn update(&self) -> Option<&dyn UpdateAuthorization> {
        None
    }

    fn read(&self, ctx: &AuthContext) -> AuthDecision {
        let _ = ctx;
        AuthDecision::Allow
    }
}

/// The permissive default used by routes that declare no authorization.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAuthorization;

impl Authorization for OpenAuthorization {}
