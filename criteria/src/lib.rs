//! Match-expression compilation for the gatehouse control plane.
//!
//! Declarative match expressions from route sub-policies compile into a
//! small predicate language ([`expr`]) evaluated per request by the external
//! decision engine. The [`decision`] module assembles the full per-route
//! decision input: identity predicates plus compiled sub-policy bodies,
//! indexed by route ID.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod decision;
pub mod expr;
pub mod matchers;

pub use self::decision::{compile_route, CompiledSubPolicy, IdentityPredicates, RouteDecision};
pub use self::expr::{Body, Clause, ListPredicate, StringPredicate, Term};
pub use self::matchers::{
    compile_match_expression, match_string, match_string_list, CriteriaError,
};
