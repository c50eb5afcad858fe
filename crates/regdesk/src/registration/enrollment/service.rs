use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use super::collaborators::{FileStorage, Notification, Notifier};
use crate::registration::attributes::{AttributeDispatcher, Dispatched, FormSchema};
use crate::registration::domain::{
    EventId, FormId, NotificationRecord, NotificationTrigger, Participant, ParticipantToken,
    Submission, TriggerCondition,
};
use crate::registration::error::EnrollmentError;
use crate::registration::store::{EnrollmentCommit, EnrollmentTarget, RegistryStore};

/// Service turning form submissions into participant writes.
///
/// Every submission is resolved by the dispatcher first and then written through a
/// single store commit; the commit repeats the capacity checks atomically, so a block
/// that filled up in between fails the whole submission with `BlockFull`.
pub struct EnrollmentCoordinator<S, F, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    dispatcher: AttributeDispatcher<S, F>,
}

impl<S, F, N> EnrollmentCoordinator<S, F, N>
where
    S: RegistryStore + 'static,
    F: FileStorage + 'static,
    N: Notifier + 'static,
{
    pub fn new(store: Arc<S>, files: Arc<F>, notifier: Arc<N>) -> Self {
        let dispatcher = AttributeDispatcher::new(Arc::clone(&store), files);
        Self {
            store,
            notifier,
            dispatcher,
        }
    }

    /// Register a new participant through the event's first form.
    pub fn submit_first_form(
        &self,
        event_id: EventId,
        form_id: FormId,
        email: &str,
        submission: Submission,
    ) -> Result<Participant, EnrollmentError> {
        let schema = self.schema(event_id, form_id)?;
        if !schema.form.is_first {
            return Err(EnrollmentError::not_found("first form", form_id));
        }

        let email = normalize_email(email)?;
        if self.store.participant_by_email(event_id, &email)?.is_some() {
            return Err(EnrollmentError::DuplicateEmail { email });
        }

        let dispatched = self.dispatcher.dispatch(&schema, submission, None)?;
        let target = EnrollmentTarget::Create {
            event_id,
            email,
            token: ParticipantToken::generate(),
        };
        let participant = self.commit(target, &dispatched)?;
        info!(
            %event_id,
            %form_id,
            participant_id = %participant.id,
            values = dispatched.values.len(),
            "participant registered"
        );

        self.notify(&schema, &participant, None, &dispatched);
        self.reload(participant)
    }

    /// Update the participant identified by `token` through a follow-up form.
    pub fn submit_subsequent_form(
        &self,
        event_id: EventId,
        form_id: FormId,
        token: &ParticipantToken,
        submission: Submission,
    ) -> Result<Participant, EnrollmentError> {
        let schema = self.schema(event_id, form_id)?;
        if schema.form.is_first {
            return Err(EnrollmentError::not_found("follow-up form", form_id));
        }
        let holder = self.holder(event_id, token)?;

        let dispatched = self.dispatcher.dispatch(&schema, submission, Some(&holder))?;
        let target = EnrollmentTarget::Update {
            participant_id: holder.id,
        };
        let participant = self.commit(target, &dispatched)?;
        info!(
            %event_id,
            %form_id,
            participant_id = %participant.id,
            values = dispatched.values.len(),
            "participant updated"
        );

        self.notify(&schema, &participant, Some(&holder), &dispatched);
        self.reload(participant)
    }

    pub fn participant(
        &self,
        event_id: EventId,
        token: &ParticipantToken,
    ) -> Result<Participant, EnrollmentError> {
        self.holder(event_id, token)
    }

    /// Delete a participant, releasing every block seat they held.
    pub fn withdraw(
        &self,
        event_id: EventId,
        token: &ParticipantToken,
    ) -> Result<(), EnrollmentError> {
        let holder = self.holder(event_id, token)?;
        self.store.delete_participant(holder.id)?;
        info!(%event_id, participant_id = %holder.id, "participant withdrawn");
        Ok(())
    }

    fn schema(&self, event_id: EventId, form_id: FormId) -> Result<FormSchema, EnrollmentError> {
        let schema = FormSchema::load(self.store.as_ref(), form_id)?;
        if schema.form.event_id != event_id {
            return Err(EnrollmentError::not_found("form", form_id));
        }
        Ok(schema)
    }

    fn holder(
        &self,
        event_id: EventId,
        token: &ParticipantToken,
    ) -> Result<Participant, EnrollmentError> {
        self.store
            .participant_by_token(event_id, token)?
            .ok_or_else(|| EnrollmentError::not_found("participant", token))
    }

    fn commit(
        &self,
        target: EnrollmentTarget,
        dispatched: &Dispatched,
    ) -> Result<Participant, EnrollmentError> {
        let commit = EnrollmentCommit {
            target,
            values: dispatched.values.clone(),
        };

        self.store.commit_enrollment(commit).map_err(|err| {
            self.dispatcher.discard(&dispatched.stored_keys());
            let err = EnrollmentError::from(err);
            if err.is_recoverable() {
                info!(code = err.code(), error = %err, "enrollment rejected at commit");
            } else {
                error!(code = err.code(), error = %err, "enrollment commit failed");
            }
            err
        })
    }

    fn reload(&self, participant: Participant) -> Result<Participant, EnrollmentError> {
        Ok(self.store.participant(participant.id)?.unwrap_or(participant))
    }

    fn notify(
        &self,
        schema: &FormSchema,
        participant: &Participant,
        previous: Option<&Participant>,
        dispatched: &Dispatched,
    ) {
        for trigger in &schema.event.triggers {
            for (key, secondary_key) in matches(trigger, schema, previous, dispatched) {
                self.deliver(participant, trigger, key, secondary_key);
            }
        }
    }

    fn deliver(
        &self,
        participant: &Participant,
        trigger: &NotificationTrigger,
        key: String,
        secondary_key: Option<String>,
    ) {
        let kind = trigger.condition.kind();
        let notification = Notification {
            event_id: participant.event_id,
            participant_id: participant.id,
            email: participant.email.clone(),
            template: trigger.template.clone(),
            trigger: kind,
            key,
            secondary_key,
        };

        if let Err(err) = self.notifier.notify(notification) {
            warn!(
                participant_id = %participant.id,
                template = %trigger.template,
                error = %err,
                "notification failed"
            );
            return;
        }

        let record = NotificationRecord {
            template: trigger.template.clone(),
            trigger: kind,
            sent_at: Utc::now(),
        };
        if let Err(err) = self.store.record_notification(participant.id, record) {
            warn!(participant_id = %participant.id, error = %err, "notification history not saved");
        }
    }
}

/// Keys of every firing of `trigger` for this submission. Block admissions only fire
/// when the participant did not already hold that block.
fn matches(
    trigger: &NotificationTrigger,
    schema: &FormSchema,
    previous: Option<&Participant>,
    dispatched: &Dispatched,
) -> Vec<(String, Option<String>)> {
    match &trigger.condition {
        TriggerCondition::FormSubmitted { form_id } if *form_id == schema.form.id => {
            vec![(form_id.to_string(), None)]
        }
        TriggerCondition::FormSubmitted { .. } => Vec::new(),
        TriggerCondition::BlockAdmitted {
            attribute_id,
            block_id,
        } => dispatched
            .admissions()
            .filter(|(attribute, _)| attribute == attribute_id)
            .filter(|(_, block)| block_id.map_or(true, |wanted| wanted == *block))
            .filter(|(attribute, block)| {
                let held = previous.and_then(|participant| participant.value(*attribute));
                held != Some(block.as_value().as_str())
            })
            .map(|(attribute, block)| (attribute.to_string(), Some(block.to_string())))
            .collect(),
    }
}

fn normalize_email(raw: &str) -> Result<String, EnrollmentError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(EnrollmentError::invalid("email", "expected an e-mail address")),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_email;

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(
            normalize_email("  Ada@Example.ORG ").expect("valid"),
            "ada@example.org"
        );
        assert!(normalize_email("not-an-address").is_err());
        assert!(normalize_email("@example.org").is_err());
    }
}
