use std::marker::PhantomData;
use std::sync::Arc;

use interlock_core::{CancelToken, ThreadKey};
use tracing::{trace, warn};

use super::LockManager;
use crate::error::{LockError, Result};
use crate::graph::{RuleFrame, Target};
use crate::resource::ResourceId;
use crate::rule::{SchedulingRule, same_rule};

impl LockManager {
    /// Enter `rule` on the calling thread, blocking while another thread holds
    /// a conflicting rule.
    ///
    /// When the innermost active rule of this thread is `rule` itself or
    /// contains it, the call only nests and never blocks. A cancelled wait
    /// returns [`LockError::Cancelled`] with no rule entered.
    pub fn begin_rule(&self, rule: &Arc<dyn SchedulingRule>, cancel: Option<&CancelToken>) -> Result<()> {
        self.begin_rule_observed(rule, cancel, &|| {})
    }

    /// [`begin_rule`](Self::begin_rule) that calls `on_wait` once if the thread
    /// has to block. `on_wait` runs with the graph locked and must not call
    /// back into the manager.
    pub fn begin_rule_observed(
        &self,
        rule: &Arc<dyn SchedulingRule>,
        cancel: Option<&CancelToken>,
        on_wait: &dyn Fn(),
    ) -> Result<()> {
        let key = ThreadKey::current();
        let mut graph = self.graph()?;

        if let Some(outer) = graph.top_rule(key).cloned() {
            if same_rule(&*outer.rule, &**rule) || outer.rule.contains(&**rule) {
                if !graph.try_grant(key, &Target::Rule(outer.node, outer.rule), 1) {
                    return Err(LockError::GraphCorrupted(format!(
                        "active rule node {} is not owned by {:?}",
                        outer.node, key
                    )));
                }
                graph.push_rule_frame(
                    key,
                    RuleFrame {
                        rule: Arc::clone(rule),
                        node: outer.node,
                    },
                );
                trace!(thread = %key, node = %outer.node, "nested rule");
                return Self::verify(&graph);
            }
        }

        let node = ResourceId::Rule(self.next_id());
        let target = Target::Rule(node, Arc::clone(rule));
        let mut graph = self.obtain(graph, key, target, cancel, on_wait)?;
        graph.push_rule_frame(
            key,
            RuleFrame {
                rule: Arc::clone(rule),
                node,
            },
        );
        trace!(thread = %key, %node, "rule begun");
        Ok(())
    }

    /// Leave the innermost active rule, which must be `rule`.
    pub fn end_rule(&self, rule: &Arc<dyn SchedulingRule>) -> Result<()> {
        let key = ThreadKey::current();
        let mut graph = self.graph()?;
        let Some(top) = graph.top_rule(key).cloned() else {
            return Err(LockError::NoActiveRule);
        };
        if !same_rule(&*top.rule, &**rule) {
            return Err(LockError::RuleMismatch {
                expected: format!("{:?}", top.rule),
                actual: format!("{:?}", rule),
            });
        }
        graph.pop_rule_frame(key);
        graph.release(key, top.node)?;
        Self::verify(&graph)
    }

    /// Depth of the calling thread's rule stack.
    pub fn rule_depth(&self) -> usize {
        self.read(|g| {
            g.threads
                .get(&ThreadKey::current())
                .map_or(0, |t| t.rule_stack.len())
        })
    }

    /// Enter `rule` and leave it again when the guard drops.
    pub fn rule_guard(&self, rule: &Arc<dyn SchedulingRule>, cancel: Option<&CancelToken>) -> Result<RuleGuard> {
        self.begin_rule(rule, cancel)?;
        Ok(RuleGuard {
            manager: self.clone(),
            rule: Arc::clone(rule),
            _not_send: PhantomData,
        })
    }
}

/// Scope of an active rule. Must be dropped on the thread that created it.
#[must_use = "the rule ends as soon as the guard is dropped"]
pub struct RuleGuard {
    manager: LockManager,
    rule: Arc<dyn SchedulingRule>,
    _not_send: PhantomData<*const ()>,
}

impl RuleGuard {
    pub fn rule(&self) -> &Arc<dyn SchedulingRule> {
        &self.rule
    }
}

impl Drop for RuleGuard {
    fn drop(&mut self) {
        if let Err(err) = self.manager.end_rule(&self.rule) {
            warn!(error = %err, rule = ?self.rule, "failed to end rule on guard drop");
        }
    }
}
