use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use kopdar_domain::DomainResult;
use kopdar_domain::appointments::{
    Appointment, AppointmentPolicy, AppointmentService, AppointmentTimelineEvent,
    CheckInAppointment, CompleteAppointment, CounterOfferAppointment, CounterOfferChange,
    ProposeAppointment, RespondToAppointment,
};
use kopdar_domain::appointments::ActivityType;
use kopdar_domain::auth::Role;
use kopdar_domain::error::DomainError;
use kopdar_domain::identity::ActorIdentity;
use kopdar_domain::locations::{CustomLocation, Location, LocationInput, LocationService};
use kopdar_domain::ports::BoxFuture;
use kopdar_domain::ports::appointments::AppointmentRepository;
use kopdar_domain::ports::directory::{DirectoryError, MatchDirectory, MatchRecord, PetRecord};
use kopdar_domain::ports::locations::LocationRepository;
use kopdar_domain::ports::notify::{AppointmentNotice, NotificationSender, NotifyError};
use kopdar_domain::transitions::AppointmentStatus;

const T0: i64 = 1_750_000_000_000;
const HOUR: i64 = 3_600_000;
const VENUE_LAT: f64 = -6.1993;
const VENUE_LON: f64 = 106.8323;

#[derive(Default)]
struct MemoryRepository {
    items: RwLock<HashMap<String, Appointment>>,
    timeline: RwLock<Vec<AppointmentTimelineEvent>>,
}

impl AppointmentRepository for MemoryRepository {
    fn create(
        &self,
        appointment: &Appointment,
        event: &AppointmentTimelineEvent,
    ) -> BoxFuture<'_, DomainResult<Appointment>> {
        let appointment = appointment.clone();
        let event = event.clone();
        Box::pin(async move {
            let mut items = self.items.write().await;
            if items.contains_key(&appointment.appointment_id) {
                return Err(DomainError::Conflict);
            }
            items.insert(appointment.appointment_id.clone(), appointment.clone());
            self.timeline.write().await.push(event);
            Ok(appointment)
        })
    }

    fn update(
        &self,
        appointment: &Appointment,
        event: &AppointmentTimelineEvent,
    ) -> BoxFuture<'_, DomainResult<Appointment>> {
        let appointment = appointment.clone();
        let event = event.clone();
        Box::pin(async move {
            let mut items = self.items.write().await;
            let stored = items
                .get(&appointment.appointment_id)
                .ok_or(DomainError::NotFound)?;
            if stored.version + 1 != appointment.version {
                return Err(DomainError::Conflict);
            }
            items.insert(appointment.appointment_id.clone(), appointment.clone());
            self.timeline.write().await.push(event);
            Ok(appointment)
        })
    }

    fn get(&self, appointment_id: &str) -> BoxFuture<'_, DomainResult<Option<Appointment>>> {
        let appointment_id = appointment_id.to_string();
        Box::pin(async move { Ok(self.items.read().await.get(&appointment_id).cloned()) })
    }

    fn get_by_request(
        &self,
        appointment_id: &str,
        request_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Appointment>>> {
        let appointment_id = appointment_id.to_string();
        let request_id = request_id.to_string();
        Box::pin(async move {
            Ok(self
                .items
                .read()
                .await
                .get(&appointment_id)
                .filter(|appointment| appointment.request_id == request_id)
                .cloned())
        })
    }

    fn get_by_actor_request(
        &self,
        user_id: &str,
        request_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Appointment>>> {
        let user_id = user_id.to_string();
        let request_id = request_id.to_string();
        Box::pin(async move {
            Ok(self
                .items
                .read()
                .await
                .values()
                .find(|appointment| {
                    appointment.request_id == request_id
                        && appointment.participant_role(&user_id).is_some()
                })
                .cloned())
        })
    }

    fn list_by_match(&self, match_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>> {
        let match_id = match_id.to_string();
        Box::pin(async move {
            Ok(self
                .items
                .read()
                .await
                .values()
                .filter(|appointment| appointment.match_id == match_id)
                .cloned()
                .collect())
        })
    }

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            Ok(self
                .items
                .read()
                .await
                .values()
                .filter(|appointment| appointment.participant_role(&user_id).is_some())
                .cloned()
                .collect())
        })
    }

    fn list_open_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            Ok(self
                .items
                .read()
                .await
                .values()
                .filter(|appointment| {
                    !appointment.status.is_terminal()
                        && appointment.participant_role(&user_id).is_some()
                })
                .cloned()
                .collect())
        })
    }

    fn list_timeline(
        &self,
        appointment_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<AppointmentTimelineEvent>>> {
        let appointment_id = appointment_id.to_string();
        Box::pin(async move {
            Ok(self
                .timeline
                .read()
                .await
                .iter()
                .filter(|event| event.appointment_id == appointment_id)
                .cloned()
                .collect())
        })
    }
}

#[derive(Default)]
struct EmptyLocations;

impl LocationRepository for EmptyLocations {
    fn create(&self, location: &Location) -> BoxFuture<'_, DomainResult<Location>> {
        let location = location.clone();
        Box::pin(async move { Ok(location) })
    }

    fn get(&self, _location_id: &str) -> BoxFuture<'_, DomainResult<Option<Location>>> {
        Box::pin(async move { Ok(None) })
    }

    fn list_recent_by_owner(
        &self,
        _owner_id: &str,
        _limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<Location>>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}

struct StaticDirectory;

impl MatchDirectory for StaticDirectory {
    fn get_match(
        &self,
        match_id: &str,
    ) -> BoxFuture<'_, Result<Option<MatchRecord>, DirectoryError>> {
        let found = (match_id == "match-1").then(|| MatchRecord {
            match_id: "match-1".to_string(),
            user_a_id: "user-a".to_string(),
            user_b_id: "user-b".to_string(),
            active: true,
        });
        Box::pin(async move { Ok(found) })
    }

    fn get_pet(&self, pet_id: &str) -> BoxFuture<'_, Result<Option<PetRecord>, DirectoryError>> {
        let owner = match pet_id {
            "pet-a" => Some("user-a"),
            "pet-b" => Some("user-b"),
            _ => None,
        };
        let pet_id = pet_id.to_string();
        Box::pin(async move {
            Ok(owner.map(|owner_id| PetRecord {
                pet_id,
                owner_id: owner_id.to_string(),
                name: "pet".to_string(),
            }))
        })
    }
}

struct SilentNotifier;

impl NotificationSender for SilentNotifier {
    fn send(&self, _notice: &AppointmentNotice) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move { Ok(()) })
    }
}

fn service() -> AppointmentService {
    AppointmentService::new(
        Arc::new(MemoryRepository::default()),
        LocationService::new(Arc::new(EmptyLocations)),
        Arc::new(StaticDirectory),
        Arc::new(SilentNotifier),
        AppointmentPolicy::default(),
    )
}

fn venue() -> LocationInput {
    LocationInput::Custom(CustomLocation {
        name: "Taman Suropati".to_string(),
        address: "Jl. Taman Suropati".to_string(),
        latitude: VENUE_LAT,
        longitude: VENUE_LON,
        city: Some("Jakarta".to_string()),
        district: Some("Menteng".to_string()),
    })
}

#[tokio::test]
async fn full_negotiation_reaches_completed() {
    let service = service();
    let inviter = ActorIdentity::with_user_id("user-a");
    let invitee = ActorIdentity::with_user_id("user-b");

    let appointment = service
        .propose(
            inviter.clone(),
            &Role::User,
            ProposeAppointment {
                match_id: "match-1".to_string(),
                inviter_pet_id: "pet-a".to_string(),
                invitee_pet_id: "pet-b".to_string(),
                scheduled_at_ms: T0 + 3 * HOUR,
                activity_type: ActivityType::Playdate,
                location: venue(),
                request_id: "req-propose".to_string(),
                correlation_id: "corr-1".to_string(),
                request_ts_ms: Some(T0),
            },
        )
        .await
        .expect("propose");
    assert_eq!(appointment.status, AppointmentStatus::Pending);

    // invitee pushes the meetup an hour later
    let appointment = service
        .counter_offer(
            invitee.clone(),
            &Role::User,
            &appointment.appointment_id,
            CounterOfferAppointment {
                change: CounterOfferChange::DateTime {
                    scheduled_at_ms: T0 + 4 * HOUR,
                },
                request_id: "req-counter".to_string(),
                correlation_id: "corr-1".to_string(),
                request_ts_ms: Some(T0 + 5 * 60_000),
            },
        )
        .await
        .expect("counter offer");
    assert_eq!(appointment.counter_offer_count, 1);
    assert_eq!(
        appointment.current_decision_user_id.as_deref(),
        Some("user-a")
    );

    let outcome = service
        .respond(
            inviter.clone(),
            &Role::User,
            &appointment.appointment_id,
            RespondToAppointment {
                accept: true,
                decline_reason: None,
                request_id: "req-accept".to_string(),
                correlation_id: "corr-1".to_string(),
                request_ts_ms: Some(T0 + 10 * 60_000),
            },
        )
        .await
        .expect("accept");
    assert_eq!(outcome.appointment.status, AppointmentStatus::Confirmed);

    let at_venue = |request_id: &str, ts: i64| CheckInAppointment {
        latitude: VENUE_LAT,
        longitude: VENUE_LON,
        request_id: request_id.to_string(),
        correlation_id: "corr-1".to_string(),
        request_ts_ms: Some(ts),
    };
    let scheduled = outcome.appointment.scheduled_at_ms;
    let appointment = service
        .check_in(
            inviter.clone(),
            &Role::User,
            &outcome.appointment.appointment_id,
            at_venue("req-ci-a", scheduled - 5 * 60_000),
        )
        .await
        .expect("inviter check-in");
    assert_eq!(appointment.status, AppointmentStatus::Confirmed);

    let appointment = service
        .check_in(
            invitee.clone(),
            &Role::User,
            &appointment.appointment_id,
            at_venue("req-ci-b", scheduled + 5 * 60_000),
        )
        .await
        .expect("invitee check-in");
    assert_eq!(appointment.status, AppointmentStatus::OnGoing);

    let appointment = service
        .complete(
            invitee,
            &Role::User,
            &appointment.appointment_id,
            CompleteAppointment {
                request_id: "req-done".to_string(),
                correlation_id: "corr-1".to_string(),
                request_ts_ms: Some(scheduled + 50 * 60_000),
            },
        )
        .await
        .expect("complete");
    assert_eq!(appointment.status, AppointmentStatus::Completed);

    let timeline = service
        .timeline(
            &ActorIdentity::with_user_id("user-a"),
            &Role::User,
            &appointment.appointment_id,
        )
        .await
        .expect("timeline");
    assert_eq!(timeline.len(), 6);
}
