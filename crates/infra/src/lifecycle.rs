//! Lifecycle transitions: load, decide, append with an expected version.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use deptforum_core::{Aggregate, AggregateRoot, ExpectedVersion, ForumError, ForumResult, TopicId, UserId};
use deptforum_events::{Event, EventEnvelope};
use deptforum_topics::{Topic, TopicCommand, TopicEvent, Transition};

use crate::store::ForumStore;

/// Outcome of a bulk transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkTransitionReport {
    /// Topics the transition was applied to, in request order.
    pub applied: Vec<TopicId>,
    /// Topics left untouched because they were already in the target state.
    pub already_in_state: Vec<TopicId>,
    /// Topics whose commit failed after the batch was resolved, such as a
    /// version `Conflict` or a topic deleted in the meantime.
    pub failed: Vec<(TopicId, ForumError)>,
}

#[derive(Debug, Clone)]
pub struct LifecycleService<S> {
    store: S,
}

impl<S> LifecycleService<S>
where
    S: ForumStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Apply one transition to one topic.
    ///
    /// Fails with `PermissionDenied` for non-admins, `AlreadyInState` when
    /// the flag already has the requested value and `Conflict` when another
    /// writer changed the topic concurrently.
    #[instrument(skip(self), fields(%actor_id, %topic_id, %transition), err)]
    pub fn transition(
        &self,
        actor_id: UserId,
        topic_id: TopicId,
        transition: Transition,
        occurred_at: DateTime<Utc>,
    ) -> ForumResult<Topic> {
        let actor = self.store.get_user(actor_id)?;
        let topic = self.store.get_topic(topic_id)?;
        let command = TopicCommand::Transition {
            transition,
            actor_id,
            actor_role: actor.role,
            occurred_at,
        };
        self.commit(&topic, &command)
    }

    /// Apply one transition to many topics.
    ///
    /// All ids are resolved first; an unknown id fails the batch before
    /// anything changes. Each topic is then committed on its own, so the
    /// batch is not atomic: topics already in the target state are reported,
    /// not rewritten, and a topic whose commit fails is listed in `failed`
    /// while the rest of the batch carries on.
    #[instrument(skip(self, topic_ids), fields(%actor_id, %transition, topics = topic_ids.len()), err)]
    pub fn apply_bulk(
        &self,
        actor_id: UserId,
        topic_ids: &[TopicId],
        transition: Transition,
        occurred_at: DateTime<Utc>,
    ) -> ForumResult<BulkTransitionReport> {
        let actor = self.store.get_user(actor_id)?;
        if !actor.is_admin() {
            return Err(ForumError::permission_denied(format!(
                "only admins can mark topics {}",
                transition.target_state()
            )));
        }

        let mut topics: Vec<Topic> = Vec::with_capacity(topic_ids.len());
        for id in topic_ids {
            if topics.iter().any(|t| t.id == *id) {
                continue;
            }
            topics.push(self.store.get_topic(*id)?);
        }

        let command = TopicCommand::Transition {
            transition,
            actor_id,
            actor_role: actor.role,
            occurred_at,
        };
        let report = self.commit_each(&topics, &command);

        info!(
            applied = report.applied.len(),
            skipped = report.already_in_state.len(),
            failed = report.failed.len(),
            "bulk transition finished"
        );
        Ok(report)
    }

    /// Every recorded transition of a topic, oldest first.
    #[instrument(skip(self), fields(%topic_id), err)]
    pub fn history(&self, topic_id: TopicId) -> ForumResult<Vec<EventEnvelope<TopicEvent>>> {
        self.store.topic_history(topic_id)
    }

    fn commit_each(&self, topics: &[Topic], command: &TopicCommand) -> BulkTransitionReport {
        let mut report = BulkTransitionReport::default();
        for topic in topics {
            match self.commit(topic, command) {
                Ok(_) => report.applied.push(topic.id),
                Err(ForumError::AlreadyInState(_)) => report.already_in_state.push(topic.id),
                Err(err) => {
                    warn!(topic_id = %topic.id, error = %err, "bulk transition skipped topic");
                    report.failed.push((topic.id, err));
                }
            }
        }
        report
    }

    fn commit(&self, topic: &Topic, command: &TopicCommand) -> ForumResult<Topic> {
        let events = topic.handle(command)?;
        let (updated, committed) = self.store.append_topic_events(
            topic.id,
            ExpectedVersion::Exact(topic.version()),
            events,
        )?;
        for envelope in &committed {
            info!(
                topic_id = %updated.id,
                event_type = envelope.payload().event_type(),
                sequence = envelope.sequence_number(),
                "topic transition recorded"
            );
        }
        debug!(version = updated.version, "topic updated");
        Ok(updated)
    }
}
