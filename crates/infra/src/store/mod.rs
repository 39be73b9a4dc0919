//! Storage boundary for the forum.
//!
//! `ForumStore` is synchronous and makes no storage assumptions. Two
//! implementations ship: `InMemoryForumStore` (tests/dev) and
//! `PostgresForumStore`.
//!
//! ## Contract
//!
//! - Uniqueness (category name, user handle, one restriction per
//!   `(target, user)`) is enforced by the store and surfaces as
//!   `ForumError::AlreadyExists` to the losing writer.
//! - Missing rows surface as `ForumError::NotFound`.
//! - `append_message` and `append_topic_events` are single units of work:
//!   the authorization check, the insert and the topic update commit
//!   together or not at all.
//! - Deleting a category removes its topics and category restrictions;
//!   deleting a topic removes its messages, topic restrictions and history.

pub mod in_memory;
pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use deptforum_auth::{RegistrationRequest, User};
use deptforum_conversations::Message;
use deptforum_core::{CategoryId, ExpectedVersion, ForumResult, RegistrationId, TopicId, UserId};
use deptforum_events::EventEnvelope;
use deptforum_topics::{Category, Grant, Restriction, RestrictionTarget, Topic, TopicAccess, TopicEvent};

pub use in_memory::InMemoryForumStore;
pub use postgres::PostgresForumStore;

/// Aggregate type recorded on topic history envelopes.
pub const TOPIC_AGGREGATE_TYPE: &str = "topics.topic";

/// Authorization hook run by `append_message` against the locked topic state.
pub type AuthorizeReply<'f> = &'f dyn Fn(&TopicAccess<'_>) -> ForumResult<()>;

/// All restriction records naming one user, keyed by target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRestrictions {
    pub categories: HashMap<CategoryId, Grant>,
    pub topics: HashMap<TopicId, Grant>,
}

impl UserRestrictions {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Restriction>) -> Self {
        let mut out = Self::default();
        for r in records {
            match r.target {
                RestrictionTarget::Category(id) => {
                    out.categories.insert(id, r.grant);
                }
                RestrictionTarget::Topic(id) => {
                    out.topics.insert(id, r.grant);
                }
            }
        }
        out
    }

    pub fn category(&self, id: CategoryId) -> Option<Grant> {
        self.categories.get(&id).copied()
    }

    pub fn topic(&self, id: TopicId) -> Option<Grant> {
        self.topics.get(&id).copied()
    }
}

pub trait ForumStore: Send + Sync {
    // ── users ───────────────────────────────────────────────────────────────
    fn insert_user(&self, user: User) -> ForumResult<User>;
    fn get_user(&self, id: UserId) -> ForumResult<User>;
    fn find_user_by_handle(&self, handle: &str) -> ForumResult<Option<User>>;

    // ── categories ──────────────────────────────────────────────────────────
    fn insert_category(&self, category: Category) -> ForumResult<Category>;
    fn get_category(&self, id: CategoryId) -> ForumResult<Category>;
    /// All categories, ordered by name.
    fn list_categories(&self) -> ForumResult<Vec<Category>>;
    fn set_category_active(&self, id: CategoryId, active: bool) -> ForumResult<Category>;
    fn delete_category(&self, id: CategoryId) -> ForumResult<()>;

    // ── topics ──────────────────────────────────────────────────────────────
    fn insert_topic(&self, topic: Topic) -> ForumResult<Topic>;
    fn get_topic(&self, id: TopicId) -> ForumResult<Topic>;
    /// Topics, optionally of one category, in creation order.
    fn list_topics(&self, category: Option<CategoryId>) -> ForumResult<Vec<Topic>>;
    /// Apply lifecycle events to a topic and record them in its history.
    ///
    /// Fails with `Conflict` when the stored version does not match
    /// `expected`. Returns the updated topic and the committed envelopes.
    fn append_topic_events(
        &self,
        id: TopicId,
        expected: ExpectedVersion,
        events: Vec<TopicEvent>,
    ) -> ForumResult<(Topic, Vec<EventEnvelope<TopicEvent>>)>;
    /// Lifecycle history of a topic, in sequence order.
    fn topic_history(&self, id: TopicId) -> ForumResult<Vec<EventEnvelope<TopicEvent>>>;
    fn delete_topic(&self, id: TopicId) -> ForumResult<()>;

    // ── restrictions ────────────────────────────────────────────────────────
    fn insert_restriction(&self, restriction: Restriction) -> ForumResult<Restriction>;
    fn find_restriction(
        &self,
        target: RestrictionTarget,
        user_id: UserId,
    ) -> ForumResult<Option<Restriction>>;
    /// Records on one target, ordered by creation time.
    fn list_restrictions(&self, target: RestrictionTarget) -> ForumResult<Vec<Restriction>>;
    fn restrictions_for_user(&self, user_id: UserId) -> ForumResult<UserRestrictions>;

    // ── messages ────────────────────────────────────────────────────────────
    /// Insert a message and bump its topic's counters in one unit of work.
    ///
    /// `authorize` sees the sender, topic, category and restriction records
    /// as of the write; an error from it aborts the append. Tagged users
    /// must exist.
    fn append_message(
        &self,
        message: Message,
        authorize: AuthorizeReply<'_>,
    ) -> ForumResult<(Message, Topic)>;
    /// Messages ordered by `created_at` ascending (ties by id).
    fn list_messages(&self, topic: Option<TopicId>) -> ForumResult<Vec<Message>>;

    // ── registrations ───────────────────────────────────────────────────────
    /// Store a new request. The handle must be unused by users and requests.
    fn insert_registration(&self, request: RegistrationRequest) -> ForumResult<RegistrationRequest>;
    fn get_registration(&self, id: RegistrationId) -> ForumResult<RegistrationRequest>;
    fn find_registration_by_handle(&self, handle: &str) -> ForumResult<Option<RegistrationRequest>>;
    /// Overwrite a request whose stored version equals `expected`.
    fn save_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
    ) -> ForumResult<()>;
    /// Save a redeemed request and create its user in one unit of work.
    fn complete_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
        user: User,
    ) -> ForumResult<User>;
}

impl<S> ForumStore for Arc<S>
where
    S: ForumStore + ?Sized,
{
    fn insert_user(&self, user: User) -> ForumResult<User> {
        (**self).insert_user(user)
    }

    fn get_user(&self, id: UserId) -> ForumResult<User> {
        (**self).get_user(id)
    }

    fn find_user_by_handle(&self, handle: &str) -> ForumResult<Option<User>> {
        (**self).find_user_by_handle(handle)
    }

    fn insert_category(&self, category: Category) -> ForumResult<Category> {
        (**self).insert_category(category)
    }

    fn get_category(&self, id: CategoryId) -> ForumResult<Category> {
        (**self).get_category(id)
    }

    fn list_categories(&self) -> ForumResult<Vec<Category>> {
        (**self).list_categories()
    }

    fn set_category_active(&self, id: CategoryId, active: bool) -> ForumResult<Category> {
        (**self).set_category_active(id, active)
    }

    fn delete_category(&self, id: CategoryId) -> ForumResult<()> {
        (**self).delete_category(id)
    }

    fn insert_topic(&self, topic: Topic) -> ForumResult<Topic> {
        (**self).insert_topic(topic)
    }

    fn get_topic(&self, id: TopicId) -> ForumResult<Topic> {
        (**self).get_topic(id)
    }

    fn list_topics(&self, category: Option<CategoryId>) -> ForumResult<Vec<Topic>> {
        (**self).list_topics(category)
    }

    fn append_topic_events(
        &self,
        id: TopicId,
        expected: ExpectedVersion,
        events: Vec<TopicEvent>,
    ) -> ForumResult<(Topic, Vec<EventEnvelope<TopicEvent>>)> {
        (**self).append_topic_events(id, expected, events)
    }

    fn topic_history(&self, id: TopicId) -> ForumResult<Vec<EventEnvelope<TopicEvent>>> {
        (**self).topic_history(id)
    }

    fn delete_topic(&self, id: TopicId) -> ForumResult<()> {
        (**self).delete_topic(id)
    }

    fn insert_restriction(&self, restriction: Restriction) -> ForumResult<Restriction> {
        (**self).insert_restriction(restriction)
    }

    fn find_restriction(
        &self,
        target: RestrictionTarget,
        user_id: UserId,
    ) -> ForumResult<Option<Restriction>> {
        (**self).find_restriction(target, user_id)
    }

    fn list_restrictions(&self, target: RestrictionTarget) -> ForumResult<Vec<Restriction>> {
        (**self).list_restrictions(target)
    }

    fn restrictions_for_user(&self, user_id: UserId) -> ForumResult<UserRestrictions> {
        (**self).restrictions_for_user(user_id)
    }

    fn append_message(
        &self,
        message: Message,
        authorize: AuthorizeReply<'_>,
    ) -> ForumResult<(Message, Topic)> {
        (**self).append_message(message, authorize)
    }

    fn list_messages(&self, topic: Option<TopicId>) -> ForumResult<Vec<Message>> {
        (**self).list_messages(topic)
    }

    fn insert_registration(&self, request: RegistrationRequest) -> ForumResult<RegistrationRequest> {
        (**self).insert_registration(request)
    }

    fn get_registration(&self, id: RegistrationId) -> ForumResult<RegistrationRequest> {
        (**self).get_registration(id)
    }

    fn find_registration_by_handle(&self, handle: &str) -> ForumResult<Option<RegistrationRequest>> {
        (**self).find_registration_by_handle(handle)
    }

    fn save_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
    ) -> ForumResult<()> {
        (**self).save_registration(request, expected)
    }

    fn complete_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
        user: User,
    ) -> ForumResult<User> {
        (**self).complete_registration(request, expected, user)
    }
}
