//! Activity ledger: append-only messages and the topic counters they drive.

use tracing::{info, instrument};

use deptforum_conversations::{Message, PostMessage};
use deptforum_core::{ForumResult, MessageId, TopicId};
use deptforum_topics::{Action, TopicAccess};

use crate::permissions::{Target, enforce};
use crate::store::ForumStore;

#[derive(Debug, Clone)]
pub struct ActivityLedger<S> {
    store: S,
    max_message_length: usize,
}

impl<S> ActivityLedger<S>
where
    S: ForumStore,
{
    pub fn new(store: S, max_message_length: usize) -> Self {
        Self {
            store,
            max_message_length,
        }
    }

    /// Post a message to a topic.
    ///
    /// The reply check, the insert and the counter update happen in one
    /// store unit of work, so concurrent posts never lose an increment and
    /// a topic closed mid-request rejects the post.
    #[instrument(
        skip(self, request),
        fields(topic_id = %request.topic_id, sender_id = %request.sender_id),
        err
    )]
    pub fn post_message(&self, request: PostMessage) -> ForumResult<Message> {
        let message = request.into_message(MessageId::new(), self.max_message_length)?;
        let target = Target::Topic(message.topic_id);

        let (message, topic) = self.store.append_message(message, &|access: &TopicAccess<'_>| {
            enforce(access.verdict(Action::Reply), Action::Reply, target)
        })?;

        info!(
            message_id = %message.id,
            tagged = message.tagged_user_ids.len(),
            total_messages = topic.total_messages,
            "message posted"
        );
        Ok(message)
    }

    /// Messages in creation order, optionally of one topic.
    ///
    /// No view check here; callers filter by topic visibility.
    #[instrument(skip(self), err)]
    pub fn list_messages(&self, topic_id: Option<TopicId>) -> ForumResult<Vec<Message>> {
        if let Some(id) = topic_id {
            self.store.get_topic(id)?;
        }
        self.store.list_messages(topic_id)
    }
}
