//! Authorization boundary.
//!
//! Authentication happens upstream; the board only asks yes/no questions
//! about an already-identified [`Principal`].

use super::fanout::Topic;
use super::models::{Principal, WorkItem};

pub trait Authorizer: Send + Sync {
    fn can_subscribe(&self, principal: &Principal, topic: Topic) -> bool;
    fn can_move(&self, principal: &Principal, item: &WorkItem) -> bool;

    /// Whether the principal may create or delete items.
    fn can_edit(&self, principal: &Principal) -> bool;
}

/// Staff and owners may do everything; customers may only watch the
/// appointments counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

impl Authorizer for RoleAuthorizer {
    fn can_subscribe(&self, principal: &Principal, topic: Topic) -> bool {
        match topic {
            Topic::Workflow => principal.role.is_shop_member(),
            Topic::Appointments => true,
        }
    }

    fn can_move(&self, principal: &Principal, _item: &WorkItem) -> bool {
        principal.role.is_shop_member()
    }

    fn can_edit(&self, principal: &Principal) -> bool {
        principal.role.is_shop_member()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{Column, Role, WorkStatus};

    fn item() -> WorkItem {
        WorkItem {
            id: 1,
            title: "Brakes".into(),
            description: String::new(),
            column: Column::Estimates,
            position: 0,
            status: WorkStatus::Pending,
            history: Vec::new(),
            created_at: "2024-01-01T00:00:00.000000Z".into(),
            updated_at: "2024-01-01T00:00:00.000000Z".into(),
        }
    }

    #[test]
    fn staff_and_owner_may_do_everything() {
        let authz = RoleAuthorizer;
        for role in [Role::Staff, Role::Owner] {
            let p = Principal::new("pat", role);
            assert!(authz.can_subscribe(&p, Topic::Workflow));
            assert!(authz.can_subscribe(&p, Topic::Appointments));
            assert!(authz.can_move(&p, &item()));
            assert!(authz.can_edit(&p));
        }
    }

    #[test]
    fn customers_only_see_appointments() {
        let authz = RoleAuthorizer;
        let p = Principal::anonymous();
        assert!(!authz.can_subscribe(&p, Topic::Workflow));
        assert!(authz.can_subscribe(&p, Topic::Appointments));
        assert!(!authz.can_move(&p, &item()));
        assert!(!authz.can_edit(&p));
    }
}
