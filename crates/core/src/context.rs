//! Explicit execution context.
//!
//! Campus and operator identity travel as a parameter through every call,
//! including across worker-thread boundaries. Nothing here is thread-bound.

use serde::{Deserialize, Serialize};

use crate::id::{CampusId, UserId};

/// Who is acting, and on which campus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestContext {
    pub campus_id: CampusId,
    pub operator_id: UserId,
}

impl RequestContext {
    pub fn new(campus_id: CampusId, operator_id: UserId) -> Self {
        Self {
            campus_id,
            operator_id,
        }
    }
}
