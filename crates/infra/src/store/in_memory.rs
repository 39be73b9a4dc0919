use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use deptforum_auth::{RegistrationRequest, User};
use deptforum_conversations::Message;
use deptforum_core::{
    Aggregate, CategoryId, ExpectedVersion, ForumError, ForumResult, RegistrationId, TopicId,
    UserId,
};
use deptforum_events::EventEnvelope;
use deptforum_topics::{Category, Grant, Restriction, RestrictionTarget, Topic, TopicAccess, TopicEvent};

use super::{AuthorizeReply, ForumStore, TOPIC_AGGREGATE_TYPE, UserRestrictions};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    categories: HashMap<CategoryId, Category>,
    topics: HashMap<TopicId, Topic>,
    history: HashMap<TopicId, Vec<EventEnvelope<TopicEvent>>>,
    /// Insertion order is creation order.
    restrictions: Vec<Restriction>,
    messages: Vec<Message>,
    registrations: HashMap<RegistrationId, RegistrationRequest>,
}

impl State {
    fn grant(&self, target: RestrictionTarget, user_id: UserId) -> Option<Grant> {
        self.restrictions
            .iter()
            .find(|r| r.target == target && r.user_id == user_id)
            .map(|r| r.grant)
    }

    fn handle_taken(&self, handle: &str) -> bool {
        self.users.values().any(|u| u.handle == handle)
            || self.registrations.values().any(|r| r.handle == handle)
    }

    fn remove_topic(&mut self, id: TopicId) {
        self.topics.remove(&id);
        self.history.remove(&id);
        self.messages.retain(|m| m.topic_id != id);
        self.restrictions
            .retain(|r| r.target != RestrictionTarget::Topic(id));
    }
}

/// In-memory forum store.
///
/// Intended for tests/dev. A single lock guards all tables, so every
/// operation is one unit of work.
#[derive(Debug, Default)]
pub struct InMemoryForumStore {
    state: RwLock<State>,
}

impl InMemoryForumStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> ForumResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| ForumError::store("lock poisoned"))
    }

    fn write(&self) -> ForumResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| ForumError::store("lock poisoned"))
    }
}

impl ForumStore for InMemoryForumStore {
    fn insert_user(&self, user: User) -> ForumResult<User> {
        let mut state = self.write()?;
        if state.users.contains_key(&user.id) || state.handle_taken(&user.handle) {
            return Err(ForumError::already_exists(format!(
                "handle '{}' is already registered or pending",
                user.handle
            )));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn get_user(&self, id: UserId) -> ForumResult<User> {
        self.read()?
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| ForumError::not_found("user", id))
    }

    fn find_user_by_handle(&self, handle: &str) -> ForumResult<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.handle == handle)
            .cloned())
    }

    fn insert_category(&self, category: Category) -> ForumResult<Category> {
        let mut state = self.write()?;
        if state.categories.values().any(|c| c.name == category.name) {
            return Err(ForumError::already_exists(format!(
                "category '{}' already exists",
                category.name
            )));
        }
        state.categories.insert(category.id, category.clone());
        Ok(category)
    }

    fn get_category(&self, id: CategoryId) -> ForumResult<Category> {
        self.read()?
            .categories
            .get(&id)
            .cloned()
            .ok_or_else(|| ForumError::not_found("category", id))
    }

    fn list_categories(&self) -> ForumResult<Vec<Category>> {
        let mut out: Vec<Category> = self.read()?.categories.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn set_category_active(&self, id: CategoryId, active: bool) -> ForumResult<Category> {
        let mut state = self.write()?;
        let category = state
            .categories
            .get_mut(&id)
            .ok_or_else(|| ForumError::not_found("category", id))?;
        category.active = active;
        Ok(category.clone())
    }

    fn delete_category(&self, id: CategoryId) -> ForumResult<()> {
        let mut state = self.write()?;
        if state.categories.remove(&id).is_none() {
            return Err(ForumError::not_found("category", id));
        }
        let topics: Vec<TopicId> = state
            .topics
            .values()
            .filter(|t| t.category_id == id)
            .map(|t| t.id)
            .collect();
        for topic_id in topics {
            state.remove_topic(topic_id);
        }
        state
            .restrictions
            .retain(|r| r.target != RestrictionTarget::Category(id));
        Ok(())
    }

    fn insert_topic(&self, topic: Topic) -> ForumResult<Topic> {
        let mut state = self.write()?;
        if !state.categories.contains_key(&topic.category_id) {
            return Err(ForumError::not_found("category", topic.category_id));
        }
        if state.topics.contains_key(&topic.id) {
            return Err(ForumError::already_exists(format!("topic {} already exists", topic.id)));
        }
        state.topics.insert(topic.id, topic.clone());
        Ok(topic)
    }

    fn get_topic(&self, id: TopicId) -> ForumResult<Topic> {
        self.read()?
            .topics
            .get(&id)
            .cloned()
            .ok_or_else(|| ForumError::not_found("topic", id))
    }

    fn list_topics(&self, category: Option<CategoryId>) -> ForumResult<Vec<Topic>> {
        let mut out: Vec<Topic> = self
            .read()?
            .topics
            .values()
            .filter(|t| category.is_none_or(|c| t.category_id == c))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }

    fn append_topic_events(
        &self,
        id: TopicId,
        expected: ExpectedVersion,
        events: Vec<TopicEvent>,
    ) -> ForumResult<(Topic, Vec<EventEnvelope<TopicEvent>>)> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let topic = state
            .topics
            .get_mut(&id)
            .ok_or_else(|| ForumError::not_found("topic", id))?;
        expected.check(topic.version)?;

        let mut committed = Vec::with_capacity(events.len());
        for event in events {
            topic.apply(&event);
            committed.push(EventEnvelope::new(
                Uuid::now_v7(),
                *id.as_uuid(),
                TOPIC_AGGREGATE_TYPE,
                topic.version,
                event,
            ));
        }
        let updated = topic.clone();

        state
            .history
            .entry(id)
            .or_default()
            .extend(committed.iter().cloned());
        Ok((updated, committed))
    }

    fn topic_history(&self, id: TopicId) -> ForumResult<Vec<EventEnvelope<TopicEvent>>> {
        let state = self.read()?;
        if !state.topics.contains_key(&id) {
            return Err(ForumError::not_found("topic", id));
        }
        Ok(state.history.get(&id).cloned().unwrap_or_default())
    }

    fn delete_topic(&self, id: TopicId) -> ForumResult<()> {
        let mut state = self.write()?;
        if !state.topics.contains_key(&id) {
            return Err(ForumError::not_found("topic", id));
        }
        state.remove_topic(id);
        Ok(())
    }

    fn insert_restriction(&self, restriction: Restriction) -> ForumResult<Restriction> {
        let mut state = self.write()?;
        match restriction.target {
            RestrictionTarget::Category(id) if !state.categories.contains_key(&id) => {
                return Err(ForumError::not_found("category", id));
            }
            RestrictionTarget::Topic(id) if !state.topics.contains_key(&id) => {
                return Err(ForumError::not_found("topic", id));
            }
            _ => {}
        }
        if !state.users.contains_key(&restriction.user_id) {
            return Err(ForumError::not_found("user", restriction.user_id));
        }
        if state
            .grant(restriction.target, restriction.user_id)
            .is_some()
        {
            return Err(ForumError::already_exists(format!(
                "restriction on {} for user {} already exists",
                restriction.target, restriction.user_id
            )));
        }
        state.restrictions.push(restriction.clone());
        Ok(restriction)
    }

    fn find_restriction(
        &self,
        target: RestrictionTarget,
        user_id: UserId,
    ) -> ForumResult<Option<Restriction>> {
        Ok(self
            .read()?
            .restrictions
            .iter()
            .find(|r| r.target == target && r.user_id == user_id)
            .cloned())
    }

    fn list_restrictions(&self, target: RestrictionTarget) -> ForumResult<Vec<Restriction>> {
        let mut out: Vec<Restriction> = self
            .read()?
            .restrictions
            .iter()
            .filter(|r| r.target == target)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    fn restrictions_for_user(&self, user_id: UserId) -> ForumResult<UserRestrictions> {
        let state = self.read()?;
        Ok(UserRestrictions::from_records(
            state.restrictions.iter().filter(|r| r.user_id == user_id),
        ))
    }

    fn append_message(
        &self,
        message: Message,
        authorize: AuthorizeReply<'_>,
    ) -> ForumResult<(Message, Topic)> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        {
            let sender = state
                .users
                .get(&message.sender_id)
                .ok_or_else(|| ForumError::not_found("user", message.sender_id))?;
            if let Some(missing) = message
                .tagged_user_ids
                .iter()
                .find(|id| !state.users.contains_key(id))
            {
                return Err(ForumError::not_found("user", missing));
            }
            let topic = state
                .topics
                .get(&message.topic_id)
                .ok_or_else(|| ForumError::not_found("topic", message.topic_id))?;
            let category = state
                .categories
                .get(&topic.category_id)
                .ok_or_else(|| ForumError::not_found("category", topic.category_id))?;

            authorize(&TopicAccess {
                user: sender,
                topic,
                category,
                category_grant: state.grant(RestrictionTarget::Category(category.id), sender.id),
                topic_grant: state.grant(RestrictionTarget::Topic(topic.id), sender.id),
            })?;
        }

        let topic = state
            .topics
            .get_mut(&message.topic_id)
            .ok_or_else(|| ForumError::not_found("topic", message.topic_id))?;
        topic.record_message(message.created_at);
        let topic = topic.clone();

        state.messages.push(message.clone());
        Ok((message, topic))
    }

    fn list_messages(&self, topic: Option<TopicId>) -> ForumResult<Vec<Message>> {
        let mut out: Vec<Message> = self
            .read()?
            .messages
            .iter()
            .filter(|m| topic.is_none_or(|t| m.topic_id == t))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(out)
    }

    fn insert_registration(&self, request: RegistrationRequest) -> ForumResult<RegistrationRequest> {
        let mut state = self.write()?;
        if state.registrations.contains_key(&request.id) || state.handle_taken(&request.handle) {
            return Err(ForumError::already_exists(format!(
                "handle '{}' is already registered or pending",
                request.handle
            )));
        }
        state.registrations.insert(request.id, request.clone());
        Ok(request)
    }

    fn get_registration(&self, id: RegistrationId) -> ForumResult<RegistrationRequest> {
        self.read()?
            .registrations
            .get(&id)
            .cloned()
            .ok_or_else(|| ForumError::not_found("registration request", id))
    }

    fn find_registration_by_handle(&self, handle: &str) -> ForumResult<Option<RegistrationRequest>> {
        Ok(self
            .read()?
            .registrations
            .values()
            .find(|r| r.handle == handle)
            .cloned())
    }

    fn save_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
    ) -> ForumResult<()> {
        let mut state = self.write()?;
        let stored = state
            .registrations
            .get_mut(&request.id)
            .ok_or_else(|| ForumError::not_found("registration request", request.id))?;
        expected.check(stored.version)?;
        *stored = request.clone();
        Ok(())
    }

    fn complete_registration(
        &self,
        request: &RegistrationRequest,
        expected: ExpectedVersion,
        user: User,
    ) -> ForumResult<User> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        if state.users.values().any(|u| u.handle == user.handle) {
            return Err(ForumError::already_exists(format!(
                "user with handle '{}' already exists",
                user.handle
            )));
        }
        let stored = state
            .registrations
            .get_mut(&request.id)
            .ok_or_else(|| ForumError::not_found("registration request", request.id))?;
        expected.check(stored.version)?;
        *stored = request.clone();
        state.users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use deptforum_auth::Role;
    use deptforum_core::MessageId;
    use deptforum_topics::{Transition, TopicCommand};

    fn user(store: &InMemoryForumStore, handle: &str, role: Role) -> User {
        store
            .insert_user(User::new(UserId::new(), handle, role, Utc::now()).unwrap().approved())
            .unwrap()
    }

    fn category(store: &InMemoryForumStore, name: &str, owner: UserId) -> Category {
        store
            .insert_category(Category::new(CategoryId::new(), name, None, owner, Utc::now()).unwrap())
            .unwrap()
    }

    fn topic(store: &InMemoryForumStore, category: CategoryId, owner: UserId) -> Topic {
        store
            .insert_topic(Topic::new(TopicId::new(), category, "Q1 Planning", None, owner, Utc::now()).unwrap())
            .unwrap()
    }

    fn restriction(target: RestrictionTarget, user_id: UserId, created_by: UserId) -> Restriction {
        Restriction {
            id: deptforum_core::RestrictionId::new(),
            target,
            user_id,
            grant: Grant::new(true, false),
            created_by,
            created_at: Utc::now(),
        }
    }

    fn allow(_: &TopicAccess<'_>) -> ForumResult<()> {
        Ok(())
    }

    #[test]
    fn category_names_are_unique() {
        let store = InMemoryForumStore::new();
        let bob = user(&store, "bob", Role::Admin);
        category(&store, "Marketing", bob.id);
        let err = store
            .insert_category(Category::new(CategoryId::new(), "Marketing", None, bob.id, Utc::now()).unwrap())
            .unwrap_err();
        assert!(matches!(err, ForumError::AlreadyExists(_)));
    }

    #[test]
    fn duplicate_restriction_is_rejected_and_first_kept() {
        let store = InMemoryForumStore::new();
        let bob = user(&store, "bob", Role::Admin);
        let alice = user(&store, "alice", Role::Regular);
        let cat = category(&store, "Marketing", bob.id);
        let target = RestrictionTarget::Category(cat.id);

        store.insert_restriction(restriction(target, alice.id, bob.id)).unwrap();
        let mut second = restriction(target, alice.id, bob.id);
        second.grant = Grant::new(false, false);
        let err = store.insert_restriction(second).unwrap_err();
        assert!(matches!(err, ForumError::AlreadyExists(_)));

        let kept = store.find_restriction(target, alice.id).unwrap().unwrap();
        assert_eq!(kept.grant, Grant::new(true, false));
    }

    #[test]
    fn deleting_a_category_cascades() {
        let store = InMemoryForumStore::new();
        let bob = user(&store, "bob", Role::Admin);
        let alice = user(&store, "alice", Role::Regular);
        let cat = category(&store, "Marketing", bob.id);
        let t = topic(&store, cat.id, bob.id);
        store
            .insert_restriction(restriction(RestrictionTarget::Topic(t.id), alice.id, bob.id))
            .unwrap();
        store
            .insert_restriction(restriction(RestrictionTarget::Category(cat.id), alice.id, bob.id))
            .unwrap();
        let msg = Message {
            id: MessageId::new(),
            topic_id: t.id,
            sender_id: alice.id,
            content: "hi".to_string(),
            tagged_user_ids: vec![],
            created_at: Utc::now(),
        };
        store.append_message(msg, &allow).unwrap();

        store.delete_category(cat.id).unwrap();

        assert!(matches!(store.get_topic(t.id), Err(ForumError::NotFound { .. })));
        assert!(store.list_messages(None).unwrap().is_empty());
        assert_eq!(store.restrictions_for_user(alice.id).unwrap(), UserRestrictions::default());
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let store = InMemoryForumStore::new();
        let bob = user(&store, "bob", Role::Admin);
        let cat = category(&store, "Marketing", bob.id);
        let t = topic(&store, cat.id, bob.id);

        let events = t
            .handle(&TopicCommand::Transition {
                transition: Transition::pin(),
                actor_id: bob.id,
                actor_role: Role::Admin,
                occurred_at: Utc::now(),
            })
            .unwrap();
        let (updated, committed) = store
            .append_topic_events(t.id, ExpectedVersion::Exact(0), events.clone())
            .unwrap();
        assert!(updated.is_pinned());
        assert_eq!(committed[0].sequence_number(), 1);
        assert_eq!(committed[0].aggregate_type(), TOPIC_AGGREGATE_TYPE);

        let err = store
            .append_topic_events(t.id, ExpectedVersion::Exact(0), events)
            .unwrap_err();
        assert!(matches!(err, ForumError::Conflict(_)));
        assert_eq!(store.topic_history(t.id).unwrap().len(), 1);
    }

    #[test]
    fn denied_append_leaves_no_trace() {
        let store = InMemoryForumStore::new();
        let bob = user(&store, "bob", Role::Admin);
        let cat = category(&store, "Marketing", bob.id);
        let t = topic(&store, cat.id, bob.id);
        let msg = Message {
            id: MessageId::new(),
            topic_id: t.id,
            sender_id: bob.id,
            content: "hi".to_string(),
            tagged_user_ids: vec![],
            created_at: Utc::now(),
        };
        let deny = |_: &TopicAccess<'_>| Err(ForumError::permission_denied("no"));
        assert!(store.append_message(msg, &deny).is_err());
        assert_eq!(store.get_topic(t.id).unwrap().total_messages, 0);
        assert!(store.list_messages(Some(t.id)).unwrap().is_empty());
    }

    #[test]
    fn unknown_tagged_user_is_not_found() {
        let store = InMemoryForumStore::new();
        let bob = user(&store, "bob", Role::Admin);
        let cat = category(&store, "Marketing", bob.id);
        let t = topic(&store, cat.id, bob.id);
        let msg = Message {
            id: MessageId::new(),
            topic_id: t.id,
            sender_id: bob.id,
            content: "hi @ghost".to_string(),
            tagged_user_ids: vec![UserId::new()],
            created_at: Utc::now(),
        };
        let err = store.append_message(msg, &allow).unwrap_err();
        assert!(matches!(err, ForumError::NotFound { entity: "user", .. }));
    }

    #[test]
    fn messages_list_in_creation_order() {
        let store = InMemoryForumStore::new();
        let bob = user(&store, "bob", Role::Admin);
        let cat = category(&store, "Marketing", bob.id);
        let t = topic(&store, cat.id, bob.id);
        let base = Utc::now();
        for offset in [3, 1, 2] {
            let msg = Message {
                id: MessageId::new(),
                topic_id: t.id,
                sender_id: bob.id,
                content: format!("m{offset}"),
                tagged_user_ids: vec![],
                created_at: base + Duration::seconds(offset),
            };
            store.append_message(msg, &allow).unwrap();
        }
        let contents: Vec<String> = store
            .list_messages(Some(t.id))
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["m1", "m2", "m3"]);
        assert_eq!(store.get_topic(t.id).unwrap().last_activity, base + Duration::seconds(3));
    }
}
