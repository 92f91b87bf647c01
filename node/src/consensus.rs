//! The consensus collaborator boundary. The pipeline only asks for an
//! opinion after booking; how the opinion forms is not its business.

use tangle_types::MessageId;

/// The consensus module's verdict on a booked message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Opinion {
    pub liked: bool,
    pub finalized: bool,
}

pub trait OpinionProvider: Send + Sync {
    fn form_opinion(&self, message_id: &MessageId) -> Opinion;
}

/// Returns the same opinion for every message. Useful for tests and
/// single-node setups without a consensus module.
pub struct FixedOpinion(pub Opinion);

impl FixedOpinion {
    pub fn liked() -> Self {
        Self(Opinion {
            liked: true,
            finalized: false,
        })
    }
}

impl OpinionProvider for FixedOpinion {
    fn form_opinion(&self, _message_id: &MessageId) -> Opinion {
        self.0
    }
}
