//! Governance policy: allow/deny evaluation, parameter whitelisting, rate
//! limiting, execution budgets, and the audit trail.

pub mod audit;
pub mod document;
pub mod engine;
pub mod rate;

pub use audit::{AuditEntry, AuditLog, AuditSink};
pub use document::{PolicyDocument, PolicyProvider, ResourceRestrictions, RoleRules};
pub use engine::{AppliedRestrictions, DecisionReason, PolicyDecision, PolicyEngine, ResourceKind};
pub use rate::{RateCounters, RateScope};
