//! Mutable per-message pipeline state.
//!
//! Every flag transitions false→true exactly once; the setter returns
//! whether this call effected the change, so each observer fires exactly
//! once even under concurrent solidification. `solid` and `invalid` are
//! mutually exclusive.

use serde::{Deserialize, Serialize};

use tangle_store::StorageObject;
use tangle_types::{BranchId, MessageId, Timestamp};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub message_id: MessageId,
    pub received_at: Timestamp,
    solidification_time: Option<Timestamp>,
    solid: bool,
    invalid: bool,
    scheduled: bool,
    booked: bool,
    eligible: bool,
    lazy_booked: bool,
    branch_id: BranchId,
}

impl MessageMetadata {
    pub fn new(message_id: MessageId, received_at: Timestamp) -> Self {
        Self {
            message_id,
            received_at,
            solidification_time: None,
            solid: false,
            invalid: false,
            scheduled: false,
            booked: false,
            eligible: false,
            lazy_booked: false,
            branch_id: BranchId::MASTER,
        }
    }

    pub fn is_solid(&self) -> bool {
        self.solid
    }

    pub fn solidification_time(&self) -> Option<Timestamp> {
        self.solidification_time
    }

    /// Mark solid at `now`. Fails (returns `false`) when already solid or
    /// marked invalid.
    pub fn set_solid(&mut self, now: Timestamp) -> bool {
        if self.solid || self.invalid {
            return false;
        }
        self.solid = true;
        self.solidification_time = Some(now);
        true
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    /// Mark invalid (terminal). Fails when already invalid or already solid.
    pub fn set_invalid(&mut self) -> bool {
        if self.invalid || self.solid {
            return false;
        }
        self.invalid = true;
        true
    }

    /// Mark invalid regardless of solidity (booking-time failures arrive
    /// after the message went solid).
    pub fn set_invalid_after_solid(&mut self) -> bool {
        if self.invalid {
            return false;
        }
        self.invalid = true;
        true
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn set_scheduled(&mut self) -> bool {
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        true
    }

    pub fn is_booked(&self) -> bool {
        self.booked
    }

    pub fn set_booked(&mut self) -> bool {
        if self.booked {
            return false;
        }
        self.booked = true;
        true
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    pub fn set_eligible(&mut self) -> bool {
        if self.eligible {
            return false;
        }
        self.eligible = true;
        true
    }

    pub fn is_lazy_booked(&self) -> bool {
        self.lazy_booked
    }

    pub fn set_lazy_booked(&mut self) -> bool {
        if self.lazy_booked {
            return false;
        }
        self.lazy_booked = true;
        true
    }

    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    pub fn set_branch_id(&mut self, branch_id: BranchId) {
        self.branch_id = branch_id;
    }
}

impl StorageObject for MessageMetadata {
    fn storage_key(&self) -> Vec<u8> {
        self.message_id.to_vec()
    }
}
