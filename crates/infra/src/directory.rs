//! Categories and topics: management plus the visibility-filtered listings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use deptforum_auth::User;
use deptforum_core::{CategoryId, ForumError, ForumResult, TopicId, UserId};
use deptforum_topics::{Action, Category, Topic};

use crate::permissions::{AccessIndex, Target, enforce};
use crate::store::ForumStore;

#[derive(Debug, Clone)]
pub struct TopicDirectory<S> {
    store: S,
}

impl<S> TopicDirectory<S>
where
    S: ForumStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    // ── categories ──────────────────────────────────────────────────────────

    #[instrument(skip(self, description), fields(%actor_id), err)]
    pub fn create_category(
        &self,
        actor_id: UserId,
        name: &str,
        description: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> ForumResult<Category> {
        self.require_admin(actor_id, "create categories")?;
        let category = Category::new(CategoryId::new(), name, description, actor_id, occurred_at)?;
        let category = self.store.insert_category(category)?;
        info!(category_id = %category.id, name = %category.name, "category created");
        Ok(category)
    }

    /// Activate or deactivate a category; repeating the current state is
    /// `AlreadyInState`.
    #[instrument(skip(self), fields(%actor_id, %category_id), err)]
    pub fn set_category_active(
        &self,
        actor_id: UserId,
        category_id: CategoryId,
        active: bool,
    ) -> ForumResult<Category> {
        self.require_admin(actor_id, "change category status")?;
        let category = self.store.get_category(category_id)?;
        if category.active == active {
            return Err(ForumError::already_in_state(format!(
                "category '{}' is already {}",
                category.name,
                if active { "active" } else { "inactive" }
            )));
        }
        let category = self.store.set_category_active(category_id, active)?;
        info!(active, "category status changed");
        Ok(category)
    }

    /// Delete a category with its topics, messages and restrictions.
    #[instrument(skip(self), fields(%actor_id, %category_id), err)]
    pub fn delete_category(&self, actor_id: UserId, category_id: CategoryId) -> ForumResult<()> {
        self.require_admin(actor_id, "delete categories")?;
        self.store.delete_category(category_id)?;
        info!("category deleted");
        Ok(())
    }

    /// Active categories the user can view, ordered by name.
    #[instrument(skip(self), fields(%user_id), err)]
    pub fn visible_categories(&self, user_id: UserId) -> ForumResult<Vec<Category>> {
        let user = self.store.get_user(user_id)?;
        let index = AccessIndex::for_user(&self.store, &user)?;
        let visible: Vec<Category> = self
            .store
            .list_categories()?
            .into_iter()
            .filter(|c| c.active && index.can_view_category(c))
            .collect();
        debug!(count = visible.len(), "visible categories");
        Ok(visible)
    }

    // ── topics ──────────────────────────────────────────────────────────────

    /// Open a topic in an active category the user can reply to.
    #[instrument(skip(self, title, description), fields(%user_id, %category_id), err)]
    pub fn create_topic(
        &self,
        user_id: UserId,
        category_id: CategoryId,
        title: &str,
        description: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> ForumResult<Topic> {
        let user = self.store.get_user(user_id)?;
        let category = self.active_category(category_id)?;
        let index = AccessIndex::for_user(&self.store, &user)?;
        enforce(
            index.category_verdict(&category, Action::Reply),
            Action::Reply,
            Target::Category(category_id),
        )?;

        let topic = Topic::new(TopicId::new(), category_id, title, description, user_id, occurred_at)?;
        let topic = self.store.insert_topic(topic)?;
        info!(topic_id = %topic.id, "topic created");
        Ok(topic)
    }

    /// Delete a topic with its messages, restrictions and history.
    #[instrument(skip(self), fields(%actor_id, %topic_id), err)]
    pub fn delete_topic(&self, actor_id: UserId, topic_id: TopicId) -> ForumResult<()> {
        self.require_admin(actor_id, "delete topics")?;
        self.store.delete_topic(topic_id)?;
        info!("topic deleted");
        Ok(())
    }

    /// Active topics the user can view, pinned first then most recent activity.
    ///
    /// Archived topics are left out for non-admins; they remain readable
    /// through a direct view check. With a category filter, an unknown or
    /// inactive category is `NotFound` and a hidden one `PermissionDenied`.
    #[instrument(skip(self), fields(%user_id), err)]
    pub fn visible_topics(
        &self,
        user_id: UserId,
        category_id: Option<CategoryId>,
    ) -> ForumResult<Vec<Topic>> {
        let user = self.store.get_user(user_id)?;
        self.listing(&user, category_id, |_| true)
    }

    /// Visible topics whose title or description contains `query`
    /// (case-insensitive).
    #[instrument(skip(self), fields(%user_id), err)]
    pub fn search_topics(
        &self,
        user_id: UserId,
        query: &str,
        category_id: Option<CategoryId>,
    ) -> ForumResult<Vec<Topic>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ForumError::validation("search query cannot be empty"));
        }
        let user = self.store.get_user(user_id)?;
        self.listing(&user, category_id, |t| t.matches_query(query))
    }

    fn listing(
        &self,
        user: &User,
        category_id: Option<CategoryId>,
        keep: impl Fn(&Topic) -> bool,
    ) -> ForumResult<Vec<Topic>> {
        let index = AccessIndex::for_user(&self.store, user)?;

        if let Some(id) = category_id {
            let category = self.active_category(id)?;
            enforce(
                index.category_verdict(&category, Action::View),
                Action::View,
                Target::Category(id),
            )?;
        }

        let categories: HashMap<CategoryId, Category> = self
            .store
            .list_categories()?
            .into_iter()
            .filter(|c| c.active)
            .map(|c| (c.id, c))
            .collect();

        let mut topics: Vec<Topic> = self
            .store
            .list_topics(category_id)?
            .into_iter()
            .filter(|t| t.is_active() && (user.is_admin() || !t.is_archived()))
            .filter(|t| {
                categories
                    .get(&t.category_id)
                    .is_some_and(|c| index.can_view_topic(t, c))
            })
            .filter(|t| keep(t))
            .collect();

        topics.sort_by(|a, b| {
            b.is_pinned()
                .cmp(&a.is_pinned())
                .then_with(|| b.last_activity.cmp(&a.last_activity))
                .then_with(|| a.id.cmp(&b.id))
        });
        debug!(count = topics.len(), "visible topics");
        Ok(topics)
    }

    fn active_category(&self, id: CategoryId) -> ForumResult<Category> {
        let category = self.store.get_category(id)?;
        if !category.active {
            return Err(ForumError::not_found("active category", id));
        }
        Ok(category)
    }

    fn require_admin(&self, actor_id: UserId, what: &str) -> ForumResult<User> {
        let actor = self.store.get_user(actor_id)?;
        if !actor.is_admin() {
            return Err(ForumError::permission_denied(format!(
                "only admins can {what}"
            )));
        }
        Ok(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use deptforum_auth::Role;
    use deptforum_core::RestrictionId;
    use deptforum_topics::{Grant, Restriction, RestrictionTarget, Transition};

    use crate::lifecycle::LifecycleService;
    use crate::store::InMemoryForumStore;

    struct Fixture {
        store: Arc<InMemoryForumStore>,
        directory: TopicDirectory<Arc<InMemoryForumStore>>,
        admin: User,
        alice: User,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryForumStore::new());
        let admin = store
            .insert_user(User::new(UserId::new(), "bob", Role::Admin, Utc::now()).unwrap())
            .unwrap();
        let alice = store
            .insert_user(User::new(UserId::new(), "alice", Role::Regular, Utc::now()).unwrap())
            .unwrap();
        Fixture {
            directory: TopicDirectory::new(store.clone()),
            store,
            admin,
            alice,
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
    fn category_management_is_admin_only_and_checked() {
        let f = fixture();
        let err = f
            .directory
            .create_category(f.alice.id, "Software", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ForumError::PermissionDenied(_)));

        let software = f
            .directory
            .create_category(f.admin.id, "Software", None, Utc::now())
            .unwrap();
        let err = f
            .directory
            .create_category(f.admin.id, "Software", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ForumError::AlreadyExists(_)));

        let err = f
            .directory
            .set_category_active(f.admin.id, software.id, true)
            .unwrap_err();
        assert!(matches!(err, ForumError::AlreadyInState(_)));
        let inactive = f
            .directory
            .set_category_active(f.admin.id, software.id, false)
            .unwrap();
        assert!(!inactive.active);
    }

    #[test]
    fn topics_need_an_active_repliable_category() {
        let f = fixture();
        let marketing = f
            .directory
            .create_category(f.admin.id, "Marketing", None, Utc::now())
            .unwrap();
        let topic = f
            .directory
            .create_topic(f.alice.id, marketing.id, " Launch ", None, Utc::now())
            .unwrap();
        assert_eq!(topic.title, "Launch");
        assert_eq!(topic.owner, f.alice.id);

        restrict(&f, RestrictionTarget::Category(marketing.id), Grant::new(true, false));
        let err = f
            .directory
            .create_topic(f.alice.id, marketing.id, "Another", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ForumError::PermissionDenied(_)));

        f.directory
            .set_category_active(f.admin.id, marketing.id, false)
            .unwrap();
        let err = f
            .directory
            .create_topic(f.admin.id, marketing.id, "Hidden", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ForumError::NotFound { .. }));
    }

    #[test]
    fn listings_filter_hidden_items_in_one_pass() {
        let f = fixture();
        let open = f
            .directory
            .create_category(f.admin.id, "Open", None, Utc::now())
            .unwrap();
        let secret = f
            .directory
            .create_category(f.admin.id, "Secret", None, Utc::now())
            .unwrap();
        restrict(&f, RestrictionTarget::Category(secret.id), Grant::new(false, false));

        let base = Utc::now();
        let old = f
            .directory
            .create_topic(f.admin.id, open.id, "old", None, base)
            .unwrap();
        let new = f
            .directory
            .create_topic(f.admin.id, open.id, "new", None, base + Duration::minutes(5))
            .unwrap();
        let hidden = f
            .directory
            .create_topic(f.admin.id, open.id, "hidden", None, base)
            .unwrap();
        let archived = f
            .directory
            .create_topic(f.admin.id, open.id, "archived", None, base)
            .unwrap();
        f.directory
            .create_topic(f.admin.id, secret.id, "classified", None, base)
            .unwrap();
        restrict(&f, RestrictionTarget::Topic(hidden.id), Grant::new(false, true));

        let lifecycle = LifecycleService::new(f.store.clone());
        lifecycle
            .transition(f.admin.id, old.id, Transition::pin(), Utc::now())
            .unwrap();
        lifecycle
            .transition(f.admin.id, archived.id, Transition::archive(), Utc::now())
            .unwrap();

        let names: Vec<String> = f
            .directory
            .visible_categories(f.alice.id)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Open"]);

        let ids: Vec<TopicId> = f
            .directory
            .visible_topics(f.alice.id, None)
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![old.id, new.id]);

        let admin_view = f.directory.visible_topics(f.admin.id, Some(open.id)).unwrap();
        assert_eq!(admin_view.len(), 4);
        assert_eq!(admin_view[0].id, old.id);

        let err = f
            .directory
            .visible_topics(f.alice.id, Some(secret.id))
            .unwrap_err();
        assert!(matches!(err, ForumError::PermissionDenied(_)));
        let err = f
            .directory
            .visible_topics(f.alice.id, Some(CategoryId::new()))
            .unwrap_err();
        assert!(matches!(err, ForumError::NotFound { .. }));
    }

    #[test]
    fn search_matches_title_or_description() {
        let f = fixture();
        let marketing = f
            .directory
            .create_category(f.admin.id, "Marketing", None, Utc::now())
            .unwrap();
        let q1 = f
            .directory
            .create_topic(f.admin.id, marketing.id, "Q1 Planning", None, Utc::now())
            .unwrap();
        let budget = f
            .directory
            .create_topic(
                f.admin.id,
                marketing.id,
                "Budget",
                Some("numbers for q1 and q2".to_string()),
                Utc::now(),
            )
            .unwrap();
        f.directory
            .create_topic(f.admin.id, marketing.id, "Offsite", None, Utc::now())
            .unwrap();

        let mut found: Vec<TopicId> = f
            .directory
            .search_topics(f.alice.id, "q1", Some(marketing.id))
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        found.sort();
        let mut expected = vec![q1.id, budget.id];
        expected.sort();
        assert_eq!(found, expected);

        let err = f.directory.search_topics(f.alice.id, "  ", None).unwrap_err();
        assert!(matches!(err, ForumError::Validation(_)));
    }

    #[test]
    fn deleting_a_topic_removes_it_from_listings() {
        let f = fixture();
        let marketing = f
            .directory
            .create_category(f.admin.id, "Marketing", None, Utc::now())
            .unwrap();
        let topic = f
            .directory
            .create_topic(f.admin.id, marketing.id, "Gone soon", None, Utc::now())
            .unwrap();
        let err = f.directory.delete_topic(f.alice.id, topic.id).unwrap_err();
        assert!(matches!(err, ForumError::PermissionDenied(_)));
        f.directory.delete_topic(f.admin.id, topic.id).unwrap();
        assert!(f.directory.visible_topics(f.admin.id, None).unwrap().is_empty());
        assert!(matches!(
            f.store.get_topic(topic.id).unwrap_err(),
            ForumError::NotFound { .. }
        ));
    }
}
