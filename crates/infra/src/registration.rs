//! Registration workflow: submit, review, redeem the one-time code.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use deptforum_auth::{
    OneTimeCode, RegistrationCommand, RegistrationEvent, RegistrationRequest, SubmitRegistration,
    User,
};
use deptforum_core::{
    Aggregate, AggregateRoot, ExpectedVersion, ForumError, ForumResult, RegistrationId, UserId,
};

use crate::store::ForumStore;

#[derive(Debug, Clone)]
pub struct RegistrationService<S> {
    store: S,
    code_ttl: Duration,
}

impl<S> RegistrationService<S>
where
    S: ForumStore,
{
    pub fn new(store: S, code_ttl: Duration) -> Self {
        Self { store, code_ttl }
    }

    /// Create a pending request. The handle must be free among users and
    /// other requests.
    #[instrument(skip(self, request), fields(handle = %request.handle), err)]
    pub fn submit(&self, request: SubmitRegistration) -> ForumResult<RegistrationRequest> {
        let mut pending = RegistrationRequest::empty(RegistrationId::new());
        let events = pending.handle(&RegistrationCommand::Submit(request))?;
        apply_all(&mut pending, &events);

        let stored = self.store.insert_registration(pending)?;
        info!(registration_id = %stored.id, "registration submitted");
        Ok(stored)
    }

    pub fn get(&self, id: RegistrationId) -> ForumResult<RegistrationRequest> {
        self.store.get_registration(id)
    }

    /// Approve a pending request and issue its one-time code.
    ///
    /// The returned request carries the code; delivering it is up to the caller.
    #[instrument(skip(self), fields(%reviewer_id, %id), err)]
    pub fn approve(
        &self,
        reviewer_id: UserId,
        id: RegistrationId,
        occurred_at: DateTime<Utc>,
    ) -> ForumResult<RegistrationRequest> {
        let reviewer = self.store.get_user(reviewer_id)?;
        let command = RegistrationCommand::Approve {
            reviewer_id,
            reviewer_role: reviewer.role,
            code: OneTimeCode::issue(occurred_at, self.code_ttl),
            occurred_at,
        };
        let approved = self.update(id, &command)?;
        info!(handle = %approved.handle, "registration approved");
        Ok(approved)
    }

    #[instrument(skip(self, notes), fields(%reviewer_id, %id), err)]
    pub fn reject(
        &self,
        reviewer_id: UserId,
        id: RegistrationId,
        notes: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> ForumResult<RegistrationRequest> {
        let reviewer = self.store.get_user(reviewer_id)?;
        let command = RegistrationCommand::Reject {
            reviewer_id,
            reviewer_role: reviewer.role,
            notes: notes.into(),
            occurred_at,
        };
        let rejected = self.update(id, &command)?;
        info!(handle = %rejected.handle, "registration rejected");
        Ok(rejected)
    }

    /// Redeem a code and create the approved regular account.
    ///
    /// Unknown or unapproved handles are `NotFound`, a wrong code is
    /// `PermissionDenied`, an expired one `Validation`.
    #[instrument(skip(self, code), fields(%handle), err)]
    pub fn verify(&self, handle: &str, code: &str, now: DateTime<Utc>) -> ForumResult<User> {
        let Some(mut request) = self.store.find_registration_by_handle(handle)? else {
            return Err(ForumError::not_found("approved registration", handle));
        };
        let expected = ExpectedVersion::Exact(request.version());
        let command = RegistrationCommand::Redeem {
            code: code.to_string(),
            occurred_at: now,
        };
        let events = request.handle(&command).inspect_err(|err| {
            if matches!(err, ForumError::PermissionDenied(_)) {
                warn!("verification code mismatch");
            }
        })?;
        apply_all(&mut request, &events);

        let user = request.to_user(UserId::new(), now)?;
        let user = self.store.complete_registration(&request, expected, user)?;
        info!(user_id = %user.id, "registration completed");
        Ok(user)
    }

    fn update(
        &self,
        id: RegistrationId,
        command: &RegistrationCommand,
    ) -> ForumResult<RegistrationRequest> {
        let mut request = self.store.get_registration(id)?;
        let expected = ExpectedVersion::Exact(request.version());
        let events = request.handle(command)?;
        apply_all(&mut request, &events);
        self.store.save_registration(&request, expected)?;
        Ok(request)
    }
}

fn apply_all(request: &mut RegistrationRequest, events: &[RegistrationEvent]) {
    for event in events {
        request.apply(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use deptforum_auth::{RegistrationStatus, Role};

    use crate::store::InMemoryForumStore;

    fn setup() -> (RegistrationService<Arc<InMemoryForumStore>>, Arc<InMemoryForumStore>, User) {
        let store = Arc::new(InMemoryForumStore::new());
        let admin = store
            .insert_user(User::new(UserId::new(), "bob", Role::Admin, Utc::now()).unwrap())
            .unwrap();
        (RegistrationService::new(store.clone(), Duration::hours(24)), store, admin)
    }

    fn submission(handle: &str) -> SubmitRegistration {
        SubmitRegistration {
            handle: handle.to_string(),
            email: format!("{handle}@example.com"),
            first_name: "Dana".to_string(),
            last_name: "Reyes".to_string(),
            department: "Marketing".to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn approved_request_redeems_into_an_approved_user() {
        let (service, store, admin) = setup();
        let request = service.submit(submission("dana")).unwrap();
        assert_eq!(request.status, RegistrationStatus::Pending);

        let approved = service.approve(admin.id, request.id, Utc::now()).unwrap();
        let code = approved.one_time_code.clone().unwrap().code;
        assert_eq!(code.len(), 6);

        let user = service.verify("dana", &code, Utc::now()).unwrap();
        assert!(user.approved);
        assert_eq!(user.role, Role::Regular);
        assert_eq!(user.display_name, "Dana Reyes");
        assert_eq!(store.find_user_by_handle("dana").unwrap(), Some(user));

        // the code is single use
        let err = service.verify("dana", &code, Utc::now()).unwrap_err();
        assert!(matches!(err, ForumError::PermissionDenied(_)));
    }

    #[test]
    fn wrong_and_expired_codes_are_distinguished() {
        let (service, store, admin) = setup();
        let request = service.submit(submission("erin")).unwrap();
        let approved_at = Utc::now();
        let approved = service.approve(admin.id, request.id, approved_at).unwrap();
        let code = approved.one_time_code.unwrap().code;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let err = service.verify("erin", wrong, Utc::now()).unwrap_err();
        assert!(matches!(err, ForumError::PermissionDenied(_)));

        let err = service
            .verify("erin", &code, approved_at + Duration::hours(25))
            .unwrap_err();
        assert!(matches!(err, ForumError::Validation(_)));
        assert!(store.find_user_by_handle("erin").unwrap().is_none());
    }

    #[test]
    fn review_requires_admin_and_pending_state() {
        let (service, store, admin) = setup();
        let alice = store
            .insert_user(User::new(UserId::new(), "alice", Role::Regular, Utc::now()).unwrap())
            .unwrap();
        let request = service.submit(submission("finn")).unwrap();

        let err = service.approve(alice.id, request.id, Utc::now()).unwrap_err();
        assert!(matches!(err, ForumError::PermissionDenied(_)));

        let rejected = service
            .reject(admin.id, request.id, "not staff", Utc::now())
            .unwrap();
        assert_eq!(rejected.status, RegistrationStatus::Rejected);
        assert_eq!(rejected.admin_notes, "not staff");

        let err = service.approve(admin.id, request.id, Utc::now()).unwrap_err();
        assert!(matches!(err, ForumError::AlreadyInState(_)));
        let err = service.verify("finn", "123456", Utc::now()).unwrap_err();
        assert!(matches!(err, ForumError::NotFound { .. }));
    }

    #[test]
    fn handles_are_unique_across_users_and_requests() {
        let (service, _, _) = setup();
        let err = service.submit(submission("bob")).unwrap_err();
        assert!(matches!(err, ForumError::AlreadyExists(_)));

        service.submit(submission("gwen")).unwrap();
        let err = service.submit(submission("gwen")).unwrap_err();
        assert!(matches!(err, ForumError::AlreadyExists(_)));
    }

    #[test]
    fn pending_handle_cannot_be_taken_by_a_direct_insert() {
        let (service, store, admin) = setup();
        let request = service.submit(submission("hana")).unwrap();

        let err = store
            .insert_user(User::new(UserId::new(), "hana", Role::Regular, Utc::now()).unwrap())
            .unwrap_err();
        assert!(matches!(err, ForumError::AlreadyExists(_)));

        // the request itself still completes
        let approved = service.approve(admin.id, request.id, Utc::now()).unwrap();
        let code = approved.one_time_code.unwrap().code;
        let user = service.verify("hana", &code, Utc::now()).unwrap();
        assert_eq!(user.handle, "hana");
    }

    #[test]
    fn unknown_handle_is_not_found() {
        let (service, _, _) = setup();
        let err = service.verify("nobody", "123456", Utc::now()).unwrap_err();
        assert!(matches!(err, ForumError::NotFound { .. }));
    }
}
