use std::fmt;
use std::thread::ThreadId;

/// Identity of a participant in the wait-for graph.
///
/// Wraps the OS thread id; ids are never reused within a process, so a key
/// stays unique for the lifetime of the graph that records it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadKey(ThreadId);

impl ThreadKey {
    /// Key of the calling thread.
    pub fn current() -> Self {
        Self(std::thread::current().id())
    }

    pub fn id(&self) -> ThreadId {
        self.0
    }
}

impl From<ThreadId> for ThreadKey {
    fn from(id: ThreadId) -> Self {
        Self(id)
    }
}

impl fmt::Debug for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
