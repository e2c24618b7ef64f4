use super::{Target, WaitForGraph};
use crate::error::{LockError, Result};

impl WaitForGraph {
    /// Verify the structural invariants of the graph.
    ///
    /// Any failure here means the bookkeeping itself is wrong; callers must
    /// treat it as fatal rather than retry.
    pub fn check_invariants(&self) -> Result<()> {
        for (id, node) in &self.resources {
            if node.depth == 0 {
                return Err(corrupted(format!("{} is held with depth 0", id)));
            }
            let Some(owner) = self.threads.get(&node.owner) else {
                return Err(corrupted(format!("{} is owned by {:?} which has no record", id, node.owner)));
            };
            if !owner.owned.contains(id) {
                return Err(corrupted(format!("{} is missing from its owner's holdings", id)));
            }
            if node.rule.is_some() != id.is_rule() {
                return Err(corrupted(format!("{} has the wrong node kind", id)));
            }
            for waiter in &node.queue {
                let waits_here = self
                    .threads
                    .get(waiter)
                    .and_then(|t| t.waiting.as_ref())
                    .is_some_and(|w| w.target.resource() == *id);
                if !waits_here {
                    return Err(corrupted(format!("{:?} is queued on {} but not waiting for it", waiter, id)));
                }
            }
        }

        for (key, record) in &self.threads {
            for id in &record.owned {
                if self.resources.get(id).map(|n| n.owner) != Some(*key) {
                    return Err(corrupted(format!("{:?} lists {} but does not own it", key, id)));
                }
            }
            if let Some(wait) = &record.waiting {
                if record.owned.contains(&wait.target.resource()) {
                    return Err(corrupted(format!(
                        "{:?} waits for {} which it already owns",
                        key,
                        wait.target.resource()
                    )));
                }
                if let Target::Lock(id) = &wait.target {
                    let queued = self.resources.get(id).is_some_and(|n| n.queue.contains(key));
                    if !queued {
                        return Err(corrupted(format!("{:?} waits for {} but is not queued", key, id)));
                    }
                }
            }
        }
        Ok(())
    }
}

fn corrupted(message: String) -> LockError {
    LockError::GraphCorrupted(message)
}
