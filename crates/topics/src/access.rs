//! Pure view/reply decisions.
//!
//! Precedence, highest first:
//! 1. topic status gates (closed, locked, archived) deny reply, for every role
//! 2. admin bypass of restriction lookups
//! 3. explicit restriction record (category first, then topic)
//! 4. default allow
//!
//! - No IO
//! - No panics
//!
//! Callers load the records (see the store's `load_*_access`) and ask for a
//! `Verdict`. A denying verdict explains itself.

use serde::Serialize;

use deptforum_auth::User;

use crate::category::Category;
use crate::lifecycle::LifecycleFlag;
use crate::restriction::{Grant, RestrictionScope};
use crate::topic::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Reply,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Reply => "reply",
        }
    }

    fn granted_by(&self, grant: &Grant) -> bool {
        match self {
            Action::View => grant.can_view,
            Action::Reply => grant.can_reply,
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "scope", rename_all = "snake_case")]
pub enum AllowReason {
    AdminBypass,
    /// Every record consulted allowed the action; the innermost one is named.
    ExplicitGrant(RestrictionScope),
    DefaultAllow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DenyReason {
    StatusGate(LifecycleFlag),
    Restricted(RestrictionScope),
}

impl core::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DenyReason::StatusGate(flag) => write!(f, "topic is {flag}"),
            DenyReason::Restricted(scope) => write!(f, "restricted at {scope} level"),
        }
    }
}

/// Outcome of an access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow(_))
    }
}

/// Everything needed to decide access to a category.
#[derive(Debug, Clone, Copy)]
pub struct CategoryAccess<'a> {
    pub user: &'a User,
    pub category: &'a Category,
    /// The `(category, user)` restriction record, if one exists.
    pub grant: Option<Grant>,
}

impl CategoryAccess<'_> {
    pub fn verdict(&self, action: Action) -> Verdict {
        if self.user.is_admin() {
            return Verdict::Allow(AllowReason::AdminBypass);
        }
        match self.grant {
            Some(grant) if action.granted_by(&grant) => {
                Verdict::Allow(AllowReason::ExplicitGrant(RestrictionScope::Category))
            }
            Some(_) => Verdict::Deny(DenyReason::Restricted(RestrictionScope::Category)),
            None => Verdict::Allow(AllowReason::DefaultAllow),
        }
    }

    pub fn can_view(&self) -> bool {
        self.verdict(Action::View).is_allowed()
    }

    pub fn can_reply(&self) -> bool {
        self.verdict(Action::Reply).is_allowed()
    }
}

/// Everything needed to decide access to a topic.
#[derive(Debug, Clone, Copy)]
pub struct TopicAccess<'a> {
    pub user: &'a User,
    pub topic: &'a Topic,
    pub category: &'a Category,
    pub category_grant: Option<Grant>,
    pub topic_grant: Option<Grant>,
}

impl TopicAccess<'_> {
    pub fn verdict(&self, action: Action) -> Verdict {
        if action == Action::Reply {
            if let Some(flag) = self.topic.flags.reply_gate() {
                return Verdict::Deny(DenyReason::StatusGate(flag));
            }
        }
        if self.user.is_admin() {
            return Verdict::Allow(AllowReason::AdminBypass);
        }

        let category = CategoryAccess {
            user: self.user,
            category: self.category,
            grant: self.category_grant,
        }
        .verdict(action);
        if let Verdict::Deny(_) = category {
            return category;
        }

        match self.topic_grant {
            Some(grant) if action.granted_by(&grant) => {
                Verdict::Allow(AllowReason::ExplicitGrant(RestrictionScope::Topic))
            }
            Some(_) => Verdict::Deny(DenyReason::Restricted(RestrictionScope::Topic)),
            None => category,
        }
    }

    pub fn can_view(&self) -> bool {
        self.verdict(Action::View).is_allowed()
    }

    pub fn can_reply(&self) -> bool {
        self.verdict(Action::Reply).is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deptforum_auth::Role;
    use deptforum_core::{CategoryId, TopicId, UserId};
    use proptest::prelude::*;

    fn user(role: Role) -> User {
        User::new(UserId::new(), "alice", role, Utc::now())
            .unwrap()
            .approved()
    }

    fn marketing() -> Category {
        Category::new(CategoryId::new(), "Marketing", None, UserId::new(), Utc::now()).unwrap()
    }

    fn topic(category: &Category) -> Topic {
        Topic::new(
            TopicId::new(),
            category.id,
            "Q1 Planning",
            None,
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    fn gated(category: &Category, gates: (bool, bool, bool)) -> Topic {
        let mut t = topic(category);
        let admin = UserId::new();
        if gates.0 {
            t.flags.closed.set(admin, Utc::now());
        }
        if gates.1 {
            t.flags.locked.set(admin, Utc::now());
        }
        if gates.2 {
            t.flags.archived.set(admin, Utc::now());
        }
        t
    }

    #[test]
    fn category_reply_restriction_leaves_view_default() {
        let alice = user(Role::Regular);
        let cat = marketing();
        let open = CategoryAccess {
            user: &alice,
            category: &cat,
            grant: None,
        };
        assert!(open.can_reply());

        let restricted = CategoryAccess {
            grant: Some(Grant::new(true, false)),
            ..open
        };
        assert!(!restricted.can_reply());
        assert!(restricted.can_view());
        assert_eq!(
            restricted.verdict(Action::Reply),
            Verdict::Deny(DenyReason::Restricted(RestrictionScope::Category))
        );
    }

    #[test]
    fn closed_topic_denies_reply_but_not_view() {
        let alice = user(Role::Regular);
        let cat = marketing();
        let t = gated(&cat, (true, false, false));
        let access = TopicAccess {
            user: &alice,
            topic: &t,
            category: &cat,
            category_grant: None,
            topic_grant: None,
        };
        assert_eq!(
            access.verdict(Action::Reply),
            Verdict::Deny(DenyReason::StatusGate(LifecycleFlag::Closed))
        );
        assert!(access.can_view());
    }

    #[test]
    fn category_denial_wins_over_topic_grant() {
        let alice = user(Role::Regular);
        let cat = marketing();
        let t = topic(&cat);
        let access = TopicAccess {
            user: &alice,
            topic: &t,
            category: &cat,
            category_grant: Some(Grant::new(false, false)),
            topic_grant: Some(Grant::new(true, true)),
        };
        assert_eq!(
            access.verdict(Action::View),
            Verdict::Deny(DenyReason::Restricted(RestrictionScope::Category))
        );
        assert!(!access.can_reply());
    }

    #[test]
    fn topic_record_supplies_value_when_category_allows() {
        let alice = user(Role::Regular);
        let cat = marketing();
        let t = topic(&cat);
        let access = TopicAccess {
            user: &alice,
            topic: &t,
            category: &cat,
            category_grant: None,
            topic_grant: Some(Grant::new(true, false)),
        };
        assert_eq!(
            access.verdict(Action::View),
            Verdict::Allow(AllowReason::ExplicitGrant(RestrictionScope::Topic))
        );
        assert_eq!(
            access.verdict(Action::Reply),
            Verdict::Deny(DenyReason::Restricted(RestrictionScope::Topic))
        );
    }

    #[test]
    fn inactive_topic_does_not_gate_reply() {
        let alice = user(Role::Regular);
        let cat = marketing();
        let mut t = topic(&cat);
        t.flags.active.clear();
        let access = TopicAccess {
            user: &alice,
            topic: &t,
            category: &cat,
            category_grant: None,
            topic_grant: None,
        };
        assert!(access.can_reply());
    }

    fn grant() -> impl Strategy<Value = Option<Grant>> {
        proptest::option::of((any::<bool>(), any::<bool>()).prop_map(|(v, r)| Grant::new(v, r)))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn categories_without_records_allow_everything(admin in any::<bool>()) {
            let u = user(if admin { Role::Admin } else { Role::Regular });
            let cat = marketing();
            let access = CategoryAccess { user: &u, category: &cat, grant: None };
            prop_assert!(access.can_view());
            prop_assert!(access.can_reply());
        }

        #[test]
        fn admins_always_view_and_only_gates_block_their_replies(
            closed in any::<bool>(),
            locked in any::<bool>(),
            archived in any::<bool>(),
            category_grant in grant(),
            topic_grant in grant()
        ) {
            let admin = user(Role::Admin);
            let cat = marketing();
            let t = gated(&cat, (closed, locked, archived));
            let access = TopicAccess {
                user: &admin,
                topic: &t,
                category: &cat,
                category_grant,
                topic_grant,
            };
            prop_assert!(access.can_view());
            prop_assert_eq!(access.can_reply(), !(closed || locked || archived));
        }

        #[test]
        fn gates_deny_reply_for_regular_users_regardless_of_records(
            which in 0usize..3,
            category_grant in grant(),
            topic_grant in grant()
        ) {
            let alice = user(Role::Regular);
            let cat = marketing();
            let gates = (which == 0, which == 1, which == 2);
            let t = gated(&cat, gates);
            let access = TopicAccess {
                user: &alice,
                topic: &t,
                category: &cat,
                category_grant,
                topic_grant,
            };
            prop_assert!(matches!(access.verdict(Action::Reply), Verdict::Deny(DenyReason::StatusGate(_))));
        }
    }
}
