use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deptforum_core::{Entity, ForumError, ForumResult, MessageId, TopicId, UserId};

/// A posted message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub topic_id: TopicId,
    pub sender_id: UserId,
    pub content: String,
    /// Distinct, in first-mention order.
    pub tagged_user_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Message {
    type Id = MessageId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Request to append a message to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMessage {
    pub topic_id: TopicId,
    pub sender_id: UserId,
    pub content: String,
    pub tagged_user_ids: Vec<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl PostMessage {
    /// Validate content and build the message row.
    ///
    /// Content is stored as given. It must contain something other than
    /// whitespace and be at most `max_len` chars.
    pub fn into_message(self, id: MessageId, max_len: usize) -> ForumResult<Message> {
        if self.content.trim().is_empty() {
            return Err(ForumError::validation("message content cannot be empty"));
        }
        if self.content.chars().count() > max_len {
            return Err(ForumError::validation(format!(
                "message content cannot exceed {max_len} characters"
            )));
        }

        let mut tagged: Vec<UserId> = Vec::with_capacity(self.tagged_user_ids.len());
        for user_id in self.tagged_user_ids {
            if !tagged.contains(&user_id) {
                tagged.push(user_id);
            }
        }

        Ok(Message {
            id,
            topic_id: self.topic_id,
            sender_id: self.sender_id,
            content: self.content,
            tagged_user_ids: tagged,
            created_at: self.occurred_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn post(content: &str, tagged: Vec<UserId>) -> PostMessage {
        PostMessage {
            topic_id: TopicId::new(),
            sender_id: UserId::new(),
            content: content.to_string(),
            tagged_user_ids: tagged,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn blank_content_is_rejected() {
        let err = post("  \n\t ", vec![]).into_message(MessageId::new(), 100).unwrap_err();
        assert!(matches!(err, ForumError::Validation(_)));
    }

    #[test]
    fn overlong_content_is_rejected() {
        let err = post("abcdef", vec![]).into_message(MessageId::new(), 5).unwrap_err();
        assert!(matches!(err, ForumError::Validation(_)));
    }

    #[test]
    fn tags_are_deduplicated_in_mention_order() {
        let (a, b) = (UserId::new(), UserId::new());
        let msg = post("see notes", vec![a, b, a])
            .into_message(MessageId::new(), 100)
            .unwrap();
        assert_eq!(msg.tagged_user_ids, vec![a, b]);
    }

    #[test]
    fn surrounding_whitespace_is_kept() {
        let snippet = "    let x = 1;\n    let y = 2;\n";
        let msg = post(snippet, vec![]).into_message(MessageId::new(), 100).unwrap();
        assert_eq!(msg.content, snippet);
    }

    proptest! {
        #[test]
        fn tags_are_distinct_after_validation(picks in proptest::collection::vec(0usize..4, 0..12)) {
            let pool: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
            let tagged: Vec<UserId> = picks.iter().map(|i| pool[*i]).collect();
            let msg = post("hello", tagged.clone()).into_message(MessageId::new(), 100).unwrap();

            let mut seen = std::collections::HashSet::new();
            prop_assert!(msg.tagged_user_ids.iter().all(|id| seen.insert(*id)));
            prop_assert!(tagged.iter().all(|id| msg.tagged_user_ids.contains(id)));
        }
    }
}
