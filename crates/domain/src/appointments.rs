use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::auth::Role;
use crate::conflicts::{ScheduleConflict, find_conflict};
use crate::error::DomainError;
use crate::geo;
use crate::identity::ActorIdentity;
use crate::locations::{LocationInput, LocationService, LocationSnapshot, validate_coordinates};
use crate::ports::appointments::AppointmentRepository;
use crate::ports::directory::{DirectoryError, MatchDirectory, MatchRecord};
use crate::ports::notify::{AppointmentNotice, NotificationSender};
use crate::transitions::{self, AppointmentAction, AppointmentStatus};
use crate::util::{format_ms_rfc3339, now_ms};

pub const MAX_REASON_LEN: usize = 500;

const MS_PER_HOUR: i64 = 3_600_000;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Walk,
    Cafe,
    Playdate,
    Park,
    Other,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Walk => "walk",
            ActivityType::Cafe => "cafe",
            ActivityType::Playdate => "playdate",
            ActivityType::Park => "park",
            ActivityType::Other => "other",
        }
    }
}

/// One negotiating side: a user together with the pet they bring along.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartyRef {
    pub user_id: String,
    pub pet_id: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Inviter,
    Invitee,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Inviter => "inviter",
            ParticipantRole::Invitee => "invitee",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub appointment_id: String,
    pub match_id: String,
    pub inviter: PartyRef,
    pub invitee: PartyRef,
    pub status: AppointmentStatus,
    pub scheduled_at_ms: i64,
    pub activity_type: ActivityType,
    pub location: LocationSnapshot,
    pub counter_offer_count: u32,
    pub current_decision_user_id: Option<String>,
    pub inviter_checked_in: bool,
    pub invitee_checked_in: bool,
    pub cancel_reason: Option<String>,
    pub decline_reason: Option<String>,
    pub version: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub request_id: String,
    pub correlation_id: String,
    pub event_hash: String,
    pub retention_tag: String,
}

impl Appointment {
    pub fn participant_role(&self, user_id: &str) -> Option<ParticipantRole> {
        if self.inviter.user_id == user_id {
            Some(ParticipantRole::Inviter)
        } else if self.invitee.user_id == user_id {
            Some(ParticipantRole::Invitee)
        } else {
            None
        }
    }

    pub fn counterpart_user_id(&self, user_id: &str) -> Option<&str> {
        match self.participant_role(user_id)? {
            ParticipantRole::Inviter => Some(self.invitee.user_id.as_str()),
            ParticipantRole::Invitee => Some(self.inviter.user_id.as_str()),
        }
    }

    pub fn checked_in(&self, role: ParticipantRole) -> bool {
        match role {
            ParticipantRole::Inviter => self.inviter_checked_in,
            ParticipantRole::Invitee => self.invitee_checked_in,
        }
    }

    pub fn both_checked_in(&self) -> bool {
        self.inviter_checked_in && self.invitee_checked_in
    }
}

/// Tunable negotiation knobs, injected once at service construction so no
/// call site hard-codes them.
#[derive(Clone, Debug)]
pub struct AppointmentPolicy {
    pub min_advance_hours: i64,
    pub max_counter_offers: u32,
    pub check_in_before_minutes: i64,
    pub check_in_after_minutes: i64,
    pub check_in_radius_meters: f64,
    pub conflict_window_minutes: i64,
    pub check_in_max_attempts: u32,
}

impl Default for AppointmentPolicy {
    fn default() -> Self {
        Self {
            min_advance_hours: 2,
            max_counter_offers: 3,
            check_in_before_minutes: 15,
            check_in_after_minutes: 30,
            check_in_radius_meters: 200.0,
            conflict_window_minutes: 120,
            check_in_max_attempts: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppointmentActorSnapshot {
    pub user_id: String,
    pub username: String,
    pub token_role: String,
    pub participant_role: Option<String>,
    pub request_id: String,
    pub correlation_id: String,
    pub request_ts_ms: i64,
}

impl AppointmentActorSnapshot {
    pub fn new(
        actor: &ActorIdentity,
        token_role: &Role,
        participant_role: Option<ParticipantRole>,
        request_id: impl Into<String>,
        correlation_id: impl Into<String>,
        request_ts_ms: i64,
    ) -> Self {
        Self {
            user_id: actor.user_id.clone(),
            username: actor.username.clone(),
            token_role: token_role.as_str().to_string(),
            participant_role: participant_role.map(|role| role.as_str().to_string()),
            request_id: request_id.into(),
            correlation_id: correlation_id.into(),
            request_ts_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentEventType {
    AppointmentCreated,
    AppointmentResponded,
    AppointmentCounterOffered,
    AppointmentCheckedIn,
    AppointmentCompleted,
    AppointmentCancelled,
    AppointmentNoShowMarked,
}

impl AppointmentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentEventType::AppointmentCreated => "appointment_created",
            AppointmentEventType::AppointmentResponded => "appointment_responded",
            AppointmentEventType::AppointmentCounterOffered => "appointment_counter_offered",
            AppointmentEventType::AppointmentCheckedIn => "appointment_checked_in",
            AppointmentEventType::AppointmentCompleted => "appointment_completed",
            AppointmentEventType::AppointmentCancelled => "appointment_cancelled",
            AppointmentEventType::AppointmentNoShowMarked => "appointment_no_show_marked",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppointmentTimelineEvent {
    pub event_id: String,
    pub appointment_id: String,
    pub event_type: AppointmentEventType,
    pub actor: AppointmentActorSnapshot,
    pub request_id: String,
    pub correlation_id: String,
    pub occurred_at_ms: i64,
    pub metadata: Option<serde_json::Value>,
    pub event_hash: String,
    pub retention_tag: String,
}

#[derive(Clone)]
pub struct ProposeAppointment {
    pub match_id: String,
    pub inviter_pet_id: String,
    pub invitee_pet_id: String,
    pub scheduled_at_ms: i64,
    pub activity_type: ActivityType,
    pub location: LocationInput,
    pub request_id: String,
    pub correlation_id: String,
    pub request_ts_ms: Option<i64>,
}

#[derive(Clone)]
pub struct RespondToAppointment {
    pub accept: bool,
    pub decline_reason: Option<String>,
    pub request_id: String,
    pub correlation_id: String,
    pub request_ts_ms: Option<i64>,
}

/// What a counter-offer changes, as a closed union so the transition code
/// can match exhaustively instead of sniffing optional fields.
#[derive(Clone, Debug)]
pub enum CounterOfferChange {
    DateTime { scheduled_at_ms: i64 },
    Location(LocationInput),
    Both {
        scheduled_at_ms: i64,
        location: LocationInput,
    },
}

#[derive(Clone)]
pub struct CounterOfferAppointment {
    pub change: CounterOfferChange,
    pub request_id: String,
    pub correlation_id: String,
    pub request_ts_ms: Option<i64>,
}

#[derive(Clone)]
pub struct CheckInAppointment {
    pub latitude: f64,
    pub longitude: f64,
    pub request_id: String,
    pub correlation_id: String,
    pub request_ts_ms: Option<i64>,
}

#[derive(Clone)]
pub struct CompleteAppointment {
    pub request_id: String,
    pub correlation_id: String,
    pub request_ts_ms: Option<i64>,
}

#[derive(Clone)]
pub struct CancelAppointment {
    pub reason: String,
    pub request_id: String,
    pub correlation_id: String,
    pub request_ts_ms: Option<i64>,
}

#[derive(Clone)]
pub struct MarkNoShow {
    pub request_id: String,
    pub correlation_id: String,
    pub request_ts_ms: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct ValidatePreconditions {
    pub match_id: String,
    pub inviter_pet_id: String,
    pub invitee_pet_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreconditionReport {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl PreconditionReport {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }

    fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RespondOutcome {
    pub appointment: Appointment,
    /// Advisory double-booking warning for the responder; never blocks.
    pub schedule_conflict: Option<ScheduleConflict>,
}

#[derive(Clone)]
pub struct AppointmentService {
    repository: Arc<dyn AppointmentRepository>,
    locations: LocationService,
    directory: Arc<dyn MatchDirectory>,
    notifier: Arc<dyn NotificationSender>,
    policy: AppointmentPolicy,
}

impl AppointmentService {
    pub fn new(
        repository: Arc<dyn AppointmentRepository>,
        locations: LocationService,
        directory: Arc<dyn MatchDirectory>,
        notifier: Arc<dyn NotificationSender>,
        policy: AppointmentPolicy,
    ) -> Self {
        Self {
            repository,
            locations,
            directory,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &AppointmentPolicy {
        &self.policy
    }

    pub async fn propose(
        &self,
        actor: ActorIdentity,
        role: &Role,
        input: ProposeAppointment,
    ) -> DomainResult<Appointment> {
        ensure_authenticated(role)?;
        let now = input.request_ts_ms.unwrap_or_else(now_ms);
        ensure_advance_notice(input.scheduled_at_ms, now, self.policy.min_advance_hours)?;

        let matched = self.load_match(&input.match_id).await?;
        if !matched.active {
            return Err(DomainError::Validation("match is no longer active".into()));
        }
        let invitee_user_id = matched
            .counterpart_of(&actor.user_id)
            .ok_or_else(|| DomainError::Forbidden("actor is not part of this match".into()))?
            .to_string();
        self.ensure_pet_owned(&input.inviter_pet_id, &actor.user_id)
            .await?;
        self.ensure_pet_owned(&input.invitee_pet_id, &invitee_user_id)
            .await?;
        // a retried proposal returns the original instead of tripping the
        // open-appointment rule on itself
        if let Some(existing) = self
            .repository
            .get_by_actor_request(&actor.user_id, &input.request_id)
            .await?
        {
            return Ok(existing);
        }
        if let Some(open) = self.find_open_for_match(&input.match_id).await? {
            return Err(DomainError::Validation(format!(
                "match already has an open appointment ({})",
                open.appointment_id
            )));
        }

        let location = self.locations.resolve(&input.location).await?;

        let appointment_id = crate::util::uuid_v7_without_dashes();
        let appointment = Appointment {
            appointment_id: appointment_id.clone(),
            match_id: input.match_id.clone(),
            inviter: PartyRef {
                user_id: actor.user_id.clone(),
                pet_id: input.inviter_pet_id.clone(),
            },
            invitee: PartyRef {
                user_id: invitee_user_id.clone(),
                pet_id: input.invitee_pet_id.clone(),
            },
            status: AppointmentStatus::Pending,
            scheduled_at_ms: input.scheduled_at_ms,
            activity_type: input.activity_type,
            location,
            counter_offer_count: 0,
            current_decision_user_id: Some(invitee_user_id.clone()),
            inviter_checked_in: false,
            invitee_checked_in: false,
            cancel_reason: None,
            decline_reason: None,
            version: 1,
            created_at_ms: now,
            updated_at_ms: now,
            request_id: input.request_id.clone(),
            correlation_id: input.correlation_id.clone(),
            event_hash: String::new(),
            retention_tag: String::new(),
        };
        let appointment = apply_appointment_audit(appointment)?;

        let snapshot = AppointmentActorSnapshot::new(
            &actor,
            role,
            Some(ParticipantRole::Inviter),
            input.request_id.clone(),
            input.correlation_id.clone(),
            now,
        );
        let event = make_appointment_event(
            appointment_id,
            AppointmentEventType::AppointmentCreated,
            snapshot,
            input.request_id,
            input.correlation_id,
            now,
            Some(serde_json::json!({
                "match_id": appointment.match_id,
                "scheduled_at": format_ms_rfc3339(appointment.scheduled_at_ms),
                "activity_type": appointment.activity_type,
                "location_name": appointment.location.name,
            })),
        )?;

        let stored = match self.repository.create(&appointment, &event).await {
            Ok(stored) => stored,
            Err(DomainError::Conflict) => {
                return self
                    .repository
                    .get_by_actor_request(&actor.user_id, &event.request_id)
                    .await?
                    .ok_or(DomainError::Conflict);
            }
            Err(err) => return Err(err),
        };
        self.notify(&stored, &event, &invitee_user_id).await;
        Ok(stored)
    }

    pub async fn get(
        &self,
        actor: &ActorIdentity,
        role: &Role,
        appointment_id: &str,
    ) -> DomainResult<Appointment> {
        let appointment = self.load(appointment_id).await?;
        ensure_can_view(&appointment, actor, role)?;
        Ok(appointment)
    }

    pub async fn timeline(
        &self,
        actor: &ActorIdentity,
        role: &Role,
        appointment_id: &str,
    ) -> DomainResult<Vec<AppointmentTimelineEvent>> {
        let appointment = self.load(appointment_id).await?;
        ensure_can_view(&appointment, actor, role)?;
        let mut events = self.repository.list_timeline(appointment_id).await?;
        events.sort_by(|left, right| {
            left.occurred_at_ms
                .cmp(&right.occurred_at_ms)
                .then_with(|| left.event_id.cmp(&right.event_id))
        });
        Ok(events)
    }

    pub async fn list_by_match(
        &self,
        actor: &ActorIdentity,
        role: &Role,
        match_id: &str,
    ) -> DomainResult<Vec<Appointment>> {
        if !role.is_admin() {
            let matched = self.load_match(match_id).await?;
            if matched.counterpart_of(&actor.user_id).is_none() {
                return Err(DomainError::Forbidden(
                    "actor is not part of this match".into(),
                ));
            }
        }
        let mut appointments = self.repository.list_by_match(match_id).await?;
        sort_newest_first(&mut appointments);
        Ok(appointments)
    }

    pub async fn list_by_user(
        &self,
        actor: &ActorIdentity,
        role: &Role,
        user_id: &str,
    ) -> DomainResult<Vec<Appointment>> {
        if actor.user_id != user_id && !role.is_admin() {
            return Err(DomainError::Forbidden(
                "appointments are visible to their own participants".into(),
            ));
        }
        let mut appointments = self.repository.list_by_user(user_id).await?;
        sort_newest_first(&mut appointments);
        Ok(appointments)
    }

    /// Read-only preflight for the propose form: reports the first reason
    /// proposing would be rejected, without touching any state.
    pub async fn validate_preconditions(
        &self,
        actor: &ActorIdentity,
        role: &Role,
        input: ValidatePreconditions,
    ) -> DomainResult<PreconditionReport> {
        ensure_authenticated(role)?;
        let Some(matched) = self
            .directory
            .get_match(&input.match_id)
            .await
            .map_err(map_directory_error)?
        else {
            return Ok(PreconditionReport::invalid("match not found"));
        };
        if !matched.active {
            return Ok(PreconditionReport::invalid("match is no longer active"));
        }
        let Some(invitee_user_id) = matched.counterpart_of(&actor.user_id) else {
            return Ok(PreconditionReport::invalid(
                "actor is not part of this match",
            ));
        };
        let invitee_user_id = invitee_user_id.to_string();
        if let Err(reason) = self
            .check_pet(&input.inviter_pet_id, &actor.user_id)
            .await?
        {
            return Ok(PreconditionReport::invalid(reason));
        }
        if let Err(reason) = self
            .check_pet(&input.invitee_pet_id, &invitee_user_id)
            .await?
        {
            return Ok(PreconditionReport::invalid(reason));
        }
        if self.find_open_for_match(&input.match_id).await?.is_some() {
            return Ok(PreconditionReport::invalid(
                "match already has an open appointment",
            ));
        }
        Ok(PreconditionReport::valid())
    }

    pub async fn respond(
        &self,
        actor: ActorIdentity,
        role: &Role,
        appointment_id: &str,
        input: RespondToAppointment,
    ) -> DomainResult<RespondOutcome> {
        ensure_authenticated(role)?;
        let input = validate_respond(input)?;
        let now = input.request_ts_ms.unwrap_or_else(now_ms);
        let appointment = self.load(appointment_id).await?;

        let action = if input.accept {
            AppointmentAction::Accept
        } else {
            AppointmentAction::Decline
        };
        let participant = transitions::ensure_permitted(
            &appointment,
            &actor.user_id,
            &action,
            self.policy.max_counter_offers,
        )?;
        let next = transitions::next_status(
            &appointment.status,
            &action,
            appointment.both_checked_in(),
        )?;

        let mut updated = appointment;
        updated.status = next;
        updated.current_decision_user_id = None;
        if !input.accept {
            updated.decline_reason = input.decline_reason.clone();
        }
        touch(
            &mut updated,
            &input.request_id,
            &input.correlation_id,
            now,
        );
        let updated = apply_appointment_audit(updated)?;

        let snapshot = AppointmentActorSnapshot::new(
            &actor,
            role,
            Some(participant),
            input.request_id.clone(),
            input.correlation_id.clone(),
            now,
        );
        let event = make_appointment_event(
            updated.appointment_id.clone(),
            AppointmentEventType::AppointmentResponded,
            snapshot,
            input.request_id,
            input.correlation_id,
            now,
            Some(serde_json::json!({
                "accept": input.accept,
                "decline_reason": input.decline_reason,
                "status": updated.status,
            })),
        )?;

        let stored = self.persist_update(appointment_id, &updated, &event).await?;

        // advisory only; a failed scan never undoes an accept that landed
        let schedule_conflict = if input.accept {
            self.detect_conflict(&actor.user_id, stored.scheduled_at_ms, Some(appointment_id))
                .await
                .unwrap_or(None)
        } else {
            None
        };

        if let Some(recipient) = stored.counterpart_user_id(&actor.user_id) {
            let recipient = recipient.to_string();
            self.notify(&stored, &event, &recipient).await;
        }
        Ok(RespondOutcome {
            appointment: stored,
            schedule_conflict,
        })
    }

    pub async fn counter_offer(
        &self,
        actor: ActorIdentity,
        role: &Role,
        appointment_id: &str,
        input: CounterOfferAppointment,
    ) -> DomainResult<Appointment> {
        ensure_authenticated(role)?;
        let now = input.request_ts_ms.unwrap_or_else(now_ms);
        let appointment = self.load(appointment_id).await?;

        let participant = transitions::ensure_permitted(
            &appointment,
            &actor.user_id,
            &AppointmentAction::CounterOffer,
            self.policy.max_counter_offers,
        )?;
        let next = transitions::next_status(
            &appointment.status,
            &AppointmentAction::CounterOffer,
            appointment.both_checked_in(),
        )?;

        let (new_scheduled_at_ms, new_location) = match &input.change {
            CounterOfferChange::DateTime { scheduled_at_ms } => (Some(*scheduled_at_ms), None),
            CounterOfferChange::Location(location) => {
                (None, Some(self.locations.resolve(location).await?))
            }
            CounterOfferChange::Both {
                scheduled_at_ms,
                location,
            } => (
                Some(*scheduled_at_ms),
                Some(self.locations.resolve(location).await?),
            ),
        };
        if let Some(scheduled_at_ms) = new_scheduled_at_ms {
            ensure_advance_notice(scheduled_at_ms, now, self.policy.min_advance_hours)?;
        }

        let counterpart = appointment
            .counterpart_user_id(&actor.user_id)
            .map(ToString::to_string)
            .ok_or_else(|| DomainError::Forbidden("actor is not a participant".into()))?;

        let mut updated = appointment;
        updated.status = next;
        if let Some(scheduled_at_ms) = new_scheduled_at_ms {
            updated.scheduled_at_ms = scheduled_at_ms;
        }
        if let Some(location) = new_location {
            updated.location = location;
        }
        updated.counter_offer_count += 1;
        updated.current_decision_user_id = Some(counterpart.clone());
        touch(
            &mut updated,
            &input.request_id,
            &input.correlation_id,
            now,
        );
        let updated = apply_appointment_audit(updated)?;

        let snapshot = AppointmentActorSnapshot::new(
            &actor,
            role,
            Some(participant),
            input.request_id.clone(),
            input.correlation_id.clone(),
            now,
        );
        let event = make_appointment_event(
            updated.appointment_id.clone(),
            AppointmentEventType::AppointmentCounterOffered,
            snapshot,
            input.request_id,
            input.correlation_id,
            now,
            Some(serde_json::json!({
                "counter_offer_count": updated.counter_offer_count,
                "scheduled_at": format_ms_rfc3339(updated.scheduled_at_ms),
                "location_name": updated.location.name,
                "awaiting_user_id": counterpart,
            })),
        )?;

        let stored = self.persist_update(appointment_id, &updated, &event).await?;
        self.notify(&stored, &event, &counterpart).await;
        Ok(stored)
    }

    /// Records the actor's own presence at the venue. The two participants
    /// legitimately race here, so a version conflict reloads and retries a
    /// bounded number of times before surfacing.
    pub async fn check_in(
        &self,
        actor: ActorIdentity,
        role: &Role,
        appointment_id: &str,
        input: CheckInAppointment,
    ) -> DomainResult<Appointment> {
        ensure_authenticated(role)?;
        validate_coordinates(input.latitude, input.longitude)?;
        let now = input.request_ts_ms.unwrap_or_else(now_ms);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let appointment = self.load(appointment_id).await?;
            let participant = transitions::ensure_permitted(
                &appointment,
                &actor.user_id,
                &AppointmentAction::CheckIn,
                self.policy.max_counter_offers,
            )?;
            let other_checked_in = match participant {
                ParticipantRole::Inviter => appointment.invitee_checked_in,
                ParticipantRole::Invitee => appointment.inviter_checked_in,
            };
            let next = transitions::next_status(
                &appointment.status,
                &AppointmentAction::CheckIn,
                other_checked_in,
            )?;
            if appointment.checked_in(participant) {
                // idempotent retry of an already-recorded check-in
                return Ok(appointment);
            }
            geo::ensure_within_window(
                now,
                appointment.scheduled_at_ms,
                self.policy.check_in_before_minutes,
                self.policy.check_in_after_minutes,
            )?;
            let distance = geo::ensure_within_radius(
                input.latitude,
                input.longitude,
                appointment.location.latitude,
                appointment.location.longitude,
                self.policy.check_in_radius_meters,
            )?;

            let mut updated = appointment;
            match participant {
                ParticipantRole::Inviter => updated.inviter_checked_in = true,
                ParticipantRole::Invitee => updated.invitee_checked_in = true,
            }
            updated.status = next;
            touch(
                &mut updated,
                &input.request_id,
                &input.correlation_id,
                now,
            );
            let updated = apply_appointment_audit(updated)?;

            let snapshot = AppointmentActorSnapshot::new(
                &actor,
                role,
                Some(participant),
                input.request_id.clone(),
                input.correlation_id.clone(),
                now,
            );
            let event = make_appointment_event(
                updated.appointment_id.clone(),
                AppointmentEventType::AppointmentCheckedIn,
                snapshot,
                input.request_id.clone(),
                input.correlation_id.clone(),
                now,
                Some(serde_json::json!({
                    "participant": participant,
                    "distance_meters": distance,
                    "status": updated.status,
                })),
            )?;

            match self.repository.update(&updated, &event).await {
                Ok(stored) => {
                    if let Some(recipient) = stored.counterpart_user_id(&actor.user_id) {
                        let recipient = recipient.to_string();
                        self.notify(&stored, &event, &recipient).await;
                    }
                    return Ok(stored);
                }
                Err(DomainError::Conflict) => {
                    if let Some(existing) = self
                        .repository
                        .get_by_request(appointment_id, &event.request_id)
                        .await?
                    {
                        return Ok(existing);
                    }
                    if attempt >= self.policy.check_in_max_attempts {
                        return Err(DomainError::Conflict);
                    }
                    // the other participant won the write; reload and retry
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn complete(
        &self,
        actor: ActorIdentity,
        role: &Role,
        appointment_id: &str,
        input: CompleteAppointment,
    ) -> DomainResult<Appointment> {
        ensure_authenticated(role)?;
        let now = input.request_ts_ms.unwrap_or_else(now_ms);
        let appointment = self.load(appointment_id).await?;

        let participant = transitions::ensure_permitted(
            &appointment,
            &actor.user_id,
            &AppointmentAction::Complete,
            self.policy.max_counter_offers,
        )?;
        let next = transitions::next_status(
            &appointment.status,
            &AppointmentAction::Complete,
            appointment.both_checked_in(),
        )?;
        if now < appointment.scheduled_at_ms {
            return Err(DomainError::Validation(
                "a meetup cannot be completed before its scheduled start".into(),
            ));
        }

        let mut updated = appointment;
        updated.status = next;
        touch(
            &mut updated,
            &input.request_id,
            &input.correlation_id,
            now,
        );
        let updated = apply_appointment_audit(updated)?;

        let snapshot = AppointmentActorSnapshot::new(
            &actor,
            role,
            Some(participant),
            input.request_id.clone(),
            input.correlation_id.clone(),
            now,
        );
        let event = make_appointment_event(
            updated.appointment_id.clone(),
            AppointmentEventType::AppointmentCompleted,
            snapshot,
            input.request_id,
            input.correlation_id,
            now,
            Some(serde_json::json!({ "status": updated.status })),
        )?;

        let stored = self.persist_update(appointment_id, &updated, &event).await?;
        if let Some(recipient) = stored.counterpart_user_id(&actor.user_id) {
            let recipient = recipient.to_string();
            self.notify(&stored, &event, &recipient).await;
        }
        Ok(stored)
    }

    pub async fn cancel(
        &self,
        actor: ActorIdentity,
        role: &Role,
        appointment_id: &str,
        input: CancelAppointment,
    ) -> DomainResult<Appointment> {
        ensure_authenticated(role)?;
        let input = validate_cancel(input)?;
        let now = input.request_ts_ms.unwrap_or_else(now_ms);
        let appointment = self.load(appointment_id).await?;

        let participant = transitions::ensure_permitted(
            &appointment,
            &actor.user_id,
            &AppointmentAction::Cancel,
            self.policy.max_counter_offers,
        )?;
        let next = transitions::next_status(
            &appointment.status,
            &AppointmentAction::Cancel,
            appointment.both_checked_in(),
        )?;

        let mut updated = appointment;
        updated.status = next;
        updated.cancel_reason = Some(input.reason.clone());
        updated.current_decision_user_id = None;
        touch(
            &mut updated,
            &input.request_id,
            &input.correlation_id,
            now,
        );
        let updated = apply_appointment_audit(updated)?;

        let snapshot = AppointmentActorSnapshot::new(
            &actor,
            role,
            Some(participant),
            input.request_id.clone(),
            input.correlation_id.clone(),
            now,
        );
        let event = make_appointment_event(
            updated.appointment_id.clone(),
            AppointmentEventType::AppointmentCancelled,
            snapshot,
            input.request_id,
            input.correlation_id,
            now,
            Some(serde_json::json!({ "reason": input.reason })),
        )?;

        let stored = self.persist_update(appointment_id, &updated, &event).await?;
        if let Some(recipient) = stored.counterpart_user_id(&actor.user_id) {
            let recipient = recipient.to_string();
            self.notify(&stored, &event, &recipient).await;
        }
        Ok(stored)
    }

    /// Accepts the no-show edge on behalf of the platform sweep that detects
    /// elapsed check-in windows. Only `Role::System` may call it.
    pub async fn mark_no_show(
        &self,
        actor: ActorIdentity,
        role: &Role,
        appointment_id: &str,
        input: MarkNoShow,
    ) -> DomainResult<Appointment> {
        if !matches!(role, Role::System) {
            return Err(DomainError::Forbidden(
                "only the platform sweep can record a no-show".into(),
            ));
        }
        let now = input.request_ts_ms.unwrap_or_else(now_ms);
        let appointment = self.load(appointment_id).await?;
        let next = transitions::next_status(
            &appointment.status,
            &AppointmentAction::MarkNoShow,
            appointment.both_checked_in(),
        )?;

        let mut updated = appointment;
        updated.status = next;
        updated.current_decision_user_id = None;
        touch(
            &mut updated,
            &input.request_id,
            &input.correlation_id,
            now,
        );
        let updated = apply_appointment_audit(updated)?;

        let snapshot = AppointmentActorSnapshot::new(
            &actor,
            role,
            None,
            input.request_id.clone(),
            input.correlation_id.clone(),
            now,
        );
        let event = make_appointment_event(
            updated.appointment_id.clone(),
            AppointmentEventType::AppointmentNoShowMarked,
            snapshot,
            input.request_id,
            input.correlation_id,
            now,
            Some(serde_json::json!({
                "inviter_checked_in": updated.inviter_checked_in,
                "invitee_checked_in": updated.invitee_checked_in,
            })),
        )?;

        let stored = self.persist_update(appointment_id, &updated, &event).await?;
        let inviter = stored.inviter.user_id.clone();
        let invitee = stored.invitee.user_id.clone();
        self.notify(&stored, &event, &inviter).await;
        self.notify(&stored, &event, &invitee).await;
        Ok(stored)
    }

    pub async fn detect_conflict(
        &self,
        user_id: &str,
        candidate_ms: i64,
        exclude_id: Option<&str>,
    ) -> DomainResult<Option<ScheduleConflict>> {
        let open = self.repository.list_open_by_user(user_id).await?;
        Ok(find_conflict(
            &open,
            candidate_ms,
            self.policy.conflict_window_minutes,
            exclude_id,
        ))
    }

    async fn load(&self, appointment_id: &str) -> DomainResult<Appointment> {
        self.repository
            .get(appointment_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    async fn load_match(&self, match_id: &str) -> DomainResult<MatchRecord> {
        self.directory
            .get_match(match_id)
            .await
            .map_err(map_directory_error)?
            .ok_or(DomainError::NotFound)
    }

    async fn ensure_pet_owned(&self, pet_id: &str, owner_id: &str) -> DomainResult<()> {
        match self.check_pet(pet_id, owner_id).await? {
            Ok(()) => Ok(()),
            Err(reason) => Err(DomainError::Validation(reason)),
        }
    }

    async fn check_pet(
        &self,
        pet_id: &str,
        owner_id: &str,
    ) -> DomainResult<Result<(), String>> {
        let Some(pet) = self
            .directory
            .get_pet(pet_id)
            .await
            .map_err(map_directory_error)?
        else {
            return Ok(Err(format!("pet {pet_id} not found")));
        };
        if pet.owner_id != owner_id {
            return Ok(Err(format!(
                "pet {pet_id} does not belong to the expected owner"
            )));
        }
        Ok(Ok(()))
    }

    async fn find_open_for_match(&self, match_id: &str) -> DomainResult<Option<Appointment>> {
        let existing = self.repository.list_by_match(match_id).await?;
        Ok(existing
            .into_iter()
            .find(|appointment| !appointment.status.is_terminal()))
    }

    async fn persist_update(
        &self,
        appointment_id: &str,
        updated: &Appointment,
        event: &AppointmentTimelineEvent,
    ) -> DomainResult<Appointment> {
        match self.repository.update(updated, event).await {
            Ok(stored) => Ok(stored),
            Err(DomainError::Conflict) => self
                .repository
                .get_by_request(appointment_id, &event.request_id)
                .await?
                .ok_or(DomainError::Conflict),
            Err(err) => Err(err),
        }
    }

    async fn notify(
        &self,
        appointment: &Appointment,
        event: &AppointmentTimelineEvent,
        recipient_user_id: &str,
    ) {
        let notice = AppointmentNotice {
            event_type: event.event_type.clone(),
            appointment_id: appointment.appointment_id.clone(),
            recipient_user_id: recipient_user_id.to_string(),
            payload: serde_json::json!({
                "appointment_id": appointment.appointment_id,
                "status": appointment.status,
                "scheduled_at": format_ms_rfc3339(appointment.scheduled_at_ms),
                "location_name": appointment.location.name,
                "correlation_id": event.correlation_id,
            }),
        };
        let _ = self.notifier.send(&notice).await;
    }
}

fn ensure_authenticated(role: &Role) -> DomainResult<()> {
    if matches!(role, Role::Anonymous) {
        return Err(DomainError::Forbidden(
            "anonymous actor is not allowed".into(),
        ));
    }
    Ok(())
}

fn ensure_advance_notice(
    scheduled_at_ms: i64,
    now_ms: i64,
    min_advance_hours: i64,
) -> DomainResult<()> {
    if scheduled_at_ms < now_ms + min_advance_hours * MS_PER_HOUR {
        return Err(DomainError::Validation(format!(
            "meetups need at least {min_advance_hours} hours notice"
        )));
    }
    Ok(())
}

fn ensure_can_view(
    appointment: &Appointment,
    actor: &ActorIdentity,
    role: &Role,
) -> DomainResult<()> {
    if role.is_admin() || appointment.participant_role(&actor.user_id).is_some() {
        return Ok(());
    }
    Err(DomainError::Forbidden(
        "appointments are visible to their own participants".into(),
    ))
}

fn touch(appointment: &mut Appointment, request_id: &str, correlation_id: &str, now_ms: i64) {
    appointment.updated_at_ms = now_ms;
    appointment.request_id = request_id.to_string();
    appointment.correlation_id = correlation_id.to_string();
    appointment.version += 1;
}

fn sort_newest_first(appointments: &mut [Appointment]) {
    appointments.sort_by(|left, right| {
        right
            .created_at_ms
            .cmp(&left.created_at_ms)
            .then_with(|| right.appointment_id.cmp(&left.appointment_id))
    });
}

fn map_directory_error(err: DirectoryError) -> DomainError {
    DomainError::Internal(format!("directory lookup failed: {err}"))
}

fn validate_respond(mut input: RespondToAppointment) -> DomainResult<RespondToAppointment> {
    if input.accept {
        input.decline_reason = None;
        return Ok(input);
    }
    let reason = input
        .decline_reason
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if reason.is_empty() {
        return Err(DomainError::Validation(
            "decline_reason is required when declining".into(),
        ));
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(DomainError::Validation(format!(
            "decline_reason exceeds max length of {MAX_REASON_LEN}"
        )));
    }
    input.decline_reason = Some(reason.to_string());
    Ok(input)
}

fn validate_cancel(mut input: CancelAppointment) -> DomainResult<CancelAppointment> {
    input.reason = input.reason.trim().to_string();
    if input.reason.is_empty() {
        return Err(DomainError::Validation(
            "cancel reason is required".into(),
        ));
    }
    if input.reason.chars().count() > MAX_REASON_LEN {
        return Err(DomainError::Validation(format!(
            "cancel reason exceeds max length of {MAX_REASON_LEN}"
        )));
    }
    Ok(input)
}

fn appointment_retention_tag(appointment_id: &str) -> String {
    format!("appointment:{appointment_id}")
}

fn timeline_retention_tag(appointment_id: &str, event_type: &AppointmentEventType) -> String {
    format!("appointment_timeline:{appointment_id}:{}", event_type.as_str())
}

fn apply_appointment_audit(mut appointment: Appointment) -> DomainResult<Appointment> {
    appointment.retention_tag = appointment_retention_tag(&appointment.appointment_id);
    appointment.event_hash = String::new();
    appointment.event_hash = crate::util::immutable_event_hash(&appointment)?;
    Ok(appointment)
}

fn make_appointment_event(
    appointment_id: String,
    event_type: AppointmentEventType,
    actor: AppointmentActorSnapshot,
    request_id: String,
    correlation_id: String,
    occurred_at_ms: i64,
    metadata: Option<serde_json::Value>,
) -> DomainResult<AppointmentTimelineEvent> {
    let mut event = AppointmentTimelineEvent {
        event_id: crate::util::uuid_v7_without_dashes(),
        retention_tag: timeline_retention_tag(&appointment_id, &event_type),
        appointment_id,
        event_type,
        actor,
        request_id,
        correlation_id,
        occurred_at_ms,
        metadata,
        event_hash: String::new(),
    };
    event.event_hash = crate::util::immutable_event_hash(&event)?;
    Ok(event)
}
