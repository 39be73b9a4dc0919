//! Store-backed access checks.
//!
//! `PermissionResolver` answers single questions (`can_view(user, target)`)
//! by loading the target and the user's records for it. `AccessIndex` loads
//! every record of one user once and then filters whole listings in memory.

use tracing::{debug, instrument};

use deptforum_auth::User;
use deptforum_core::{CategoryId, ForumError, ForumResult, TopicId};
use deptforum_topics::{
    Action, Category, CategoryAccess, RestrictionTarget, Topic, TopicAccess, Verdict,
};

use crate::store::{ForumStore, UserRestrictions};

/// What an access check is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Category(CategoryId),
    Topic(TopicId),
}

impl core::fmt::Display for Target {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Target::Category(id) => write!(f, "category {id}"),
            Target::Topic(id) => write!(f, "topic {id}"),
        }
    }
}

/// Turn a verdict into `Ok(())` or `PermissionDenied`.
pub(crate) fn enforce(verdict: Verdict, action: Action, target: Target) -> ForumResult<()> {
    match verdict {
        Verdict::Allow(_) => Ok(()),
        Verdict::Deny(reason) => {
            debug!(%target, %action, %reason, "access denied");
            Err(ForumError::permission_denied(format!(
                "cannot {action} {target}: {reason}"
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct PermissionResolver<S> {
    store: S,
}

impl<S> PermissionResolver<S>
where
    S: ForumStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Decide `action` on `target` for `user`.
    ///
    /// Fails with `NotFound` when the target (or a topic's category) is
    /// missing. Admins skip the restriction lookups entirely.
    #[instrument(skip(self, user), fields(user_id = %user.id, %target, %action), err)]
    pub fn verdict(&self, user: &User, target: Target, action: Action) -> ForumResult<Verdict> {
        let verdict = match target {
            Target::Category(id) => {
                let category = self.store.get_category(id)?;
                let grant = self.grant(user, RestrictionTarget::Category(id))?;
                CategoryAccess {
                    user,
                    category: &category,
                    grant,
                }
                .verdict(action)
            }
            Target::Topic(id) => {
                let topic = self.store.get_topic(id)?;
                let category = self.store.get_category(topic.category_id)?;
                let category_grant = self.grant(user, RestrictionTarget::Category(category.id))?;
                let topic_grant = self.grant(user, RestrictionTarget::Topic(id))?;
                TopicAccess {
                    user,
                    topic: &topic,
                    category: &category,
                    category_grant,
                    topic_grant,
                }
                .verdict(action)
            }
        };
        debug!(?verdict, "resolved");
        Ok(verdict)
    }

    pub fn can_view(&self, user: &User, target: Target) -> ForumResult<bool> {
        Ok(self.verdict(user, target, Action::View)?.is_allowed())
    }

    pub fn can_reply(&self, user: &User, target: Target) -> ForumResult<bool> {
        Ok(self.verdict(user, target, Action::Reply)?.is_allowed())
    }

    /// `Ok(())` when allowed, `PermissionDenied` naming the reason otherwise.
    pub fn authorize(&self, user: &User, target: Target, action: Action) -> ForumResult<()> {
        enforce(self.verdict(user, target, action)?, action, target)
    }

    fn grant(
        &self,
        user: &User,
        target: RestrictionTarget,
    ) -> ForumResult<Option<deptforum_topics::Grant>> {
        if user.is_admin() {
            return Ok(None);
        }
        Ok(self
            .store
            .find_restriction(target, user.id)?
            .map(|r| r.grant))
    }
}

/// Precomputed access for one user, for filtering listings in bulk.
#[derive(Debug, Clone)]
pub struct AccessIndex {
    user: User,
    restrictions: UserRestrictions,
}

impl AccessIndex {
    /// Load the user's restriction records with a single store read.
    pub fn for_user<S: ForumStore + ?Sized>(store: &S, user: &User) -> ForumResult<Self> {
        let restrictions = if user.is_admin() {
            UserRestrictions::default()
        } else {
            store.restrictions_for_user(user.id)?
        };
        Ok(Self {
            user: user.clone(),
            restrictions,
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn category_verdict(&self, category: &Category, action: Action) -> Verdict {
        CategoryAccess {
            user: &self.user,
            category,
            grant: self.restrictions.category(category.id),
        }
        .verdict(action)
    }

    /// `category` must be the topic's category.
    pub fn topic_verdict(&self, topic: &Topic, category: &Category, action: Action) -> Verdict {
        TopicAccess {
            user: &self.user,
            topic,
            category,
            category_grant: self.restrictions.category(category.id),
            topic_grant: self.restrictions.topic(topic.id),
        }
        .verdict(action)
    }

    pub fn can_view_category(&self, category: &Category) -> bool {
        self.category_verdict(category, Action::View).is_allowed()
    }

    pub fn can_view_topic(&self, topic: &Topic, category: &Category) -> bool {
        self.topic_verdict(topic, category, Action::View).is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use deptforum_auth::Role;
    use deptforum_core::{RestrictionId, UserId};
    use deptforum_topics::{AllowReason, DenyReason, Grant, LifecycleFlag, Restriction, RestrictionScope};

    use crate::store::InMemoryForumStore;

    struct Fixture {
        store: Arc<InMemoryForumStore>,
        admin: User,
        alice: User,
        category: Category,
        topic: Topic,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryForumStore::new());
        let admin = store
            .insert_user(User::new(UserId::new(), "bob", Role::Admin, Utc::now()).unwrap())
            .unwrap();
        let alice = store
            .insert_user(User::new(UserId::new(), "alice", Role::Regular, Utc::now()).unwrap().approved())
            .unwrap();
        let category = store
            .insert_category(Category::new(CategoryId::new(), "Marketing", None, admin.id, Utc::now()).unwrap())
            .unwrap();
        let topic = store
            .insert_topic(Topic::new(TopicId::new(), category.id, "Q1 Planning", None, admin.id, Utc::now()).unwrap())
            .unwrap();
        Fixture {
            store,
            admin,
            alice,
            category,
            topic,
        }
    }

    fn restrict(f: &Fixture, target: RestrictionTarget, grant: Grant) {
        f.store
            .insert_restriction(Restriction {
                id: RestrictionId::new(),
                target,
                user_id: f.alice.id,
                grant,
                created_by: f.admin.id,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    #[test]
    fn unknown_targets_are_not_found() {
        let f = fixture();
        let resolver = PermissionResolver::new(f.store.clone());
        let err = resolver
            .can_view(&f.alice, Target::Topic(TopicId::new()))
            .unwrap_err();
        assert!(matches!(err, ForumError::NotFound { entity: "topic", .. }));
        let err = resolver
            .can_reply(&f.admin, Target::Category(CategoryId::new()))
            .unwrap_err();
        assert!(matches!(err, ForumError::NotFound { entity: "category", .. }));
    }

    #[test]
    fn topic_restriction_is_reported_with_its_scope() {
        let f = fixture();
        restrict(&f, RestrictionTarget::Topic(f.topic.id), Grant::new(false, false));
        let resolver = PermissionResolver::new(f.store.clone());

        let verdict = resolver
            .verdict(&f.alice, Target::Topic(f.topic.id), Action::View)
            .unwrap();
        assert_eq!(verdict, Verdict::Deny(DenyReason::Restricted(RestrictionScope::Topic)));
        assert!(resolver.can_view(&f.alice, Target::Category(f.category.id)).unwrap());

        let err = resolver
            .authorize(&f.alice, Target::Topic(f.topic.id), Action::Reply)
            .unwrap_err();
        assert!(matches!(err, ForumError::PermissionDenied(msg) if msg.contains("restricted at topic level")));
    }

    #[test]
    fn admins_bypass_records() {
        let f = fixture();
        let resolver = PermissionResolver::new(f.store.clone());
        assert_eq!(
            resolver
                .verdict(&f.admin, Target::Topic(f.topic.id), Action::Reply)
                .unwrap(),
            Verdict::Allow(AllowReason::AdminBypass)
        );
    }

    #[test]
    fn index_agrees_with_resolver() {
        let f = fixture();
        restrict(&f, RestrictionTarget::Category(f.category.id), Grant::new(true, false));
        restrict(&f, RestrictionTarget::Topic(f.topic.id), Grant::new(false, true));

        let resolver = PermissionResolver::new(f.store.clone());
        let index = AccessIndex::for_user(&f.store, &f.alice).unwrap();
        for action in [Action::View, Action::Reply] {
            assert_eq!(
                index.category_verdict(&f.category, action),
                resolver
                    .verdict(&f.alice, Target::Category(f.category.id), action)
                    .unwrap()
            );
            assert_eq!(
                index.topic_verdict(&f.topic, &f.category, action),
                resolver
                    .verdict(&f.alice, Target::Topic(f.topic.id), action)
                    .unwrap()
            );
        }
    }

    #[test]
    fn status_gate_is_named_in_denial() {
        let f = fixture();
        let mut closed = f.topic.clone();
        closed.flags.closed.set(f.admin.id, Utc::now());
        let index = AccessIndex::for_user(&f.store, &f.admin).unwrap();
        assert_eq!(
            index.topic_verdict(&closed, &f.category, Action::Reply),
            Verdict::Deny(DenyReason::StatusGate(LifecycleFlag::Closed))
        );
        assert!(index.can_view_topic(&closed, &f.category));
    }
}
