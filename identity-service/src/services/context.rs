use std::time::Duration;

use tokio::time::Instant;

use crate::models::ClientMeta;

/// Per-call context for an identity flow.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Work still running at this instant is abandoned and rolled back.
    pub deadline: Option<Instant>,
    pub client: ClientMeta,
}

impl RequestContext {
    pub fn new(client: ClientMeta) -> Self {
        Self {
            deadline: None,
            client,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= Instant::now())
    }
}
