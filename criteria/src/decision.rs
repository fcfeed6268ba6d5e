//! Per-route input for the decision engine.
//!
//! One [`RouteDecision`] is produced per validated policy: the route's
//! identity predicates (allowlists unioned across the route and its
//! sub-policies) plus one compiled predicate body per sub-policy.

use crate::expr::Body;
use crate::matchers::{compile_match_expression, CriteriaError};
use gatehouse_core::{FlattenedClaims, Policy};

/// Identity constraints evaluated for every request to a route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityPredicates {
    pub allow_public: bool,
    pub allow_any_authenticated: bool,
    pub users: Vec<String>,
    pub domains: Vec<String>,
    pub claims: Vec<FlattenedClaims>,
}

/// A sub-policy's compiled predicate body plus its operator-facing strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledSubPolicy {
    pub id: String,
    pub name: String,
    pub body: Body,
    /// Why this rule set denies a request.
    pub explanation: String,
    /// What a user can do to gain access.
    pub remediation: String,
}

/// Everything the decision engine needs for one route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteDecision {
    pub route_id: String,
    pub identity: IdentityPredicates,
    pub policies: Vec<CompiledSubPolicy>,
}

/// Compiles a validated policy into its decision-engine input.
pub fn compile_route(route_id: &str, policy: &Policy) -> Result<RouteDecision, CriteriaError> {
    let identity = IdentityPredicates {
        allow_public: policy.allow_public_unauthenticated_access,
        allow_any_authenticated: policy.allow_any_authenticated_user,
        users: policy.all_allowed_users(),
        domains: policy.all_allowed_domains(),
        claims: policy.all_allowed_idp_claims(),
    };

    let mut policies = Vec::with_capacity(policy.sub_policies.len());
    for sp in &policy.sub_policies {
        // Validation already rejects these; fail closed regardless, since an
        // empty body is vacuously true.
        if sp.invalid_match_expr.is_some() {
            return Err(CriteriaError::UnparsableExpression);
        }
        let mut body = Body::new();
        if let Some(expr) = &sp.match_expr {
            compile_match_expression(&mut body, expr)?;
        }
        policies.push(CompiledSubPolicy {
            id: sp.id.clone(),
            name: sp.name.clone(),
            body,
            explanation: sp.explanation.clone(),
            remediation: sp.remediation.clone(),
        });
    }

    Ok(RouteDecision {
        route_id: route_id.to_string(),
        identity,
        policies,
    })
}
