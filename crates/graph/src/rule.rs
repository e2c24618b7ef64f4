//! Scheduling rules: capabilities that serialize work without an explicit lock.

use std::any::Any;
use std::fmt;

/// A rule held by a thread (or a running job) for the duration of
/// `begin_rule` .. `end_rule`.
///
/// Two rules may not be held by different threads at the same time if either
/// one reports a conflict with the other.
pub trait SchedulingRule: Send + Sync + fmt::Debug {
    /// Whether this rule conflicts with `other`. Need not be symmetric.
    fn conflicts_with(&self, other: &dyn SchedulingRule) -> bool;

    /// Whether a thread already inside this rule may begin `other` as a nested
    /// rule without further admission. Defaults to identity.
    fn contains(&self, other: &dyn SchedulingRule) -> bool {
        std::ptr::addr_eq(self as *const Self, other as *const dyn SchedulingRule)
    }

    fn as_any(&self) -> &dyn Any;
}

/// Pointer identity of two rule instances.
pub fn same_rule(a: &dyn SchedulingRule, b: &dyn SchedulingRule) -> bool {
    std::ptr::addr_eq(a as *const dyn SchedulingRule, b as *const dyn SchedulingRule)
}

/// Conflict as the manager sees it: identity, or a conflict in either direction.
pub fn rules_conflict(a: &dyn SchedulingRule, b: &dyn SchedulingRule) -> bool {
    same_rule(a, b) || a.conflicts_with(b) || b.conflicts_with(a)
}

/// Rule that conflicts only with itself.
#[derive(Debug)]
pub struct IdentityRule {
    label: String,
}

impl IdentityRule {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl SchedulingRule for IdentityRule {
    fn conflicts_with(&self, other: &dyn SchedulingRule) -> bool {
        same_rule(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hierarchical rule over `/`-separated paths.
///
/// A path conflicts with its ancestors and descendants and contains its
/// descendants, so a thread inside `/a` may nest `/a/b` freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    segments: Vec<String>,
}

impl PathRule {
    pub fn new(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    fn is_prefix_of(&self, other: &PathRule) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }
}

impl SchedulingRule for PathRule {
    fn conflicts_with(&self, other: &dyn SchedulingRule) -> bool {
        match other.as_any().downcast_ref::<PathRule>() {
            Some(other) => self.is_prefix_of(other) || other.is_prefix_of(self),
            None => false,
        }
    }

    fn contains(&self, other: &dyn SchedulingRule) -> bool {
        match other.as_any().downcast_ref::<PathRule>() {
            Some(other) => self.is_prefix_of(other),
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
