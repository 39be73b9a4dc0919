//! Restriction store service: admin-managed per-user overrides.

use tracing::{info, instrument, warn};

use deptforum_core::{ForumError, ForumResult, RestrictionId};
use deptforum_topics::{NewRestriction, Restriction, RestrictionTarget};

use crate::store::ForumStore;

#[derive(Debug, Clone)]
pub struct RestrictionService<S> {
    store: S,
}

impl<S> RestrictionService<S>
where
    S: ForumStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Create a restriction record.
    ///
    /// Records are never updated in place: a second record for the same
    /// `(target, user)` fails with `AlreadyExists` and leaves the first one
    /// untouched. Restricting yourself is a `Validation` error whatever the
    /// actor's role; otherwise the actor must be an admin.
    #[instrument(
        skip(self, request),
        fields(target = %request.target, user_id = %request.user_id, created_by = %request.created_by),
        err
    )]
    pub fn upsert(&self, request: NewRestriction) -> ForumResult<Restriction> {
        let target = request.target;
        let record = request.into_restriction(RestrictionId::new())?;

        let actor = self.store.get_user(record.created_by)?;
        if !actor.is_admin() {
            warn!(actor = %actor.handle, "non-admin attempted to create a restriction");
            return Err(ForumError::permission_denied(
                "only admins can manage restrictions",
            ));
        }
        self.store.get_user(record.user_id)?;
        self.ensure_target(target)?;

        let record = self.store.insert_restriction(record)?;
        info!(
            restriction_id = %record.id,
            can_view = record.grant.can_view,
            can_reply = record.grant.can_reply,
            "restriction created"
        );
        Ok(record)
    }

    /// All records on `target`, oldest first.
    #[instrument(skip(self), fields(%target), err)]
    pub fn list(&self, target: RestrictionTarget) -> ForumResult<Vec<Restriction>> {
        self.ensure_target(target)?;
        self.store.list_restrictions(target)
    }

    fn ensure_target(&self, target: RestrictionTarget) -> ForumResult<()> {
        match target {
            RestrictionTarget::Category(id) => self.store.get_category(id).map(|_| ()),
            RestrictionTarget::Topic(id) => self.store.get_topic(id).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use deptforum_auth::{Role, User};
    use deptforum_core::{CategoryId, UserId};
    use deptforum_topics::{Category, Grant};

    use crate::store::InMemoryForumStore;

    fn setup() -> (Arc<InMemoryForumStore>, User, User, Category) {
        let store = Arc::new(InMemoryForumStore::new());
        let admin = store
            .insert_user(User::new(UserId::new(), "bob", Role::Admin, Utc::now()).unwrap())
            .unwrap();
        let alice = store
            .insert_user(User::new(UserId::new(), "alice", Role::Regular, Utc::now()).unwrap())
            .unwrap();
        let category = store
            .insert_category(Category::new(CategoryId::new(), "Software", None, admin.id, Utc::now()).unwrap())
            .unwrap();
        (store, admin, alice, category)
    }

    fn request(target: RestrictionTarget, user: &User, by: &User) -> NewRestriction {
        NewRestriction {
            target,
            user_id: user.id,
            grant: Grant::new(true, false),
            created_by: by.id,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn admin_creates_and_lists_in_creation_order() {
        let (store, admin, alice, category) = setup();
        let carol = store
            .insert_user(User::new(UserId::new(), "carol", Role::Regular, Utc::now()).unwrap())
            .unwrap();
        let service = RestrictionService::new(store);
        let target = RestrictionTarget::Category(category.id);

        let mut later = request(target, &alice, &admin);
        later.occurred_at = Utc::now() + Duration::seconds(5);
        service.upsert(later).unwrap();
        service.upsert(request(target, &carol, &admin)).unwrap();

        let listed = service.list(target).unwrap();
        let users: Vec<UserId> = listed.iter().map(|r| r.user_id).collect();
        assert_eq!(users, vec![carol.id, alice.id]);
    }

    #[test]
    fn self_restriction_is_validation_even_for_admins() {
        let (store, admin, _, category) = setup();
        let service = RestrictionService::new(store);
        let err = service
            .upsert(request(RestrictionTarget::Category(category.id), &admin, &admin))
            .unwrap_err();
        assert_eq!(err, ForumError::validation("cannot restrict yourself"));
    }

    #[test]
    fn regular_users_cannot_restrict_others() {
        let (store, admin, alice, category) = setup();
        let service = RestrictionService::new(store);
        let err = service
            .upsert(request(RestrictionTarget::Category(category.id), &admin, &alice))
            .unwrap_err();
        assert!(matches!(err, ForumError::PermissionDenied(_)));
    }

    #[test]
    fn unknown_target_is_not_found() {
        let (store, admin, alice, _) = setup();
        let service = RestrictionService::new(store);
        let err = service
            .upsert(request(RestrictionTarget::Category(CategoryId::new()), &alice, &admin))
            .unwrap_err();
        assert!(matches!(err, ForumError::NotFound { entity: "category", .. }));
    }
}
