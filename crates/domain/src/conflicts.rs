use serde::{Deserialize, Serialize};

use crate::appointments::Appointment;
use crate::transitions::AppointmentStatus;

const MS_PER_MINUTE: i64 = 60_000;

/// Advisory double-booking warning. Never blocks a transition.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConflict {
    pub appointment_id: String,
    pub scheduled_at_ms: i64,
    pub status: AppointmentStatus,
}

/// Scans the user's open appointments for one whose scheduled instant lies
/// within ± `window_minutes` of the candidate. The closest hit wins.
pub fn find_conflict(
    candidates: &[Appointment],
    candidate_ms: i64,
    window_minutes: i64,
    exclude_id: Option<&str>,
) -> Option<ScheduleConflict> {
    let window_ms = window_minutes * MS_PER_MINUTE;
    candidates
        .iter()
        .filter(|appointment| !appointment.status.is_terminal())
        .filter(|appointment| exclude_id != Some(appointment.appointment_id.as_str()))
        .filter(|appointment| (appointment.scheduled_at_ms - candidate_ms).abs() <= window_ms)
        .min_by_key(|appointment| (appointment.scheduled_at_ms - candidate_ms).abs())
        .map(|appointment| ScheduleConflict {
            appointment_id: appointment.appointment_id.clone(),
            scheduled_at_ms: appointment.scheduled_at_ms,
            status: appointment.status,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointments::{ActivityType, PartyRef};
    use crate::locations::LocationSnapshot;

    fn appointment(id: &str, status: AppointmentStatus, scheduled_at_ms: i64) -> Appointment {
        Appointment {
            appointment_id: id.to_string(),
            match_id: "match-1".to_string(),
            inviter: PartyRef {
                user_id: "user-a".to_string(),
                pet_id: "pet-a".to_string(),
            },
            invitee: PartyRef {
                user_id: "user-b".to_string(),
                pet_id: "pet-b".to_string(),
            },
            status,
            scheduled_at_ms,
            activity_type: ActivityType::Walk,
            location: LocationSnapshot {
                name: "Taman Menteng".to_string(),
                address: "Jl. HOS Cokroaminoto".to_string(),
                latitude: -6.196,
                longitude: 106.829,
                city: None,
                district: None,
            },
            counter_offer_count: 0,
            current_decision_user_id: None,
            inviter_checked_in: false,
            invitee_checked_in: false,
            cancel_reason: None,
            decline_reason: None,
            version: 1,
            created_at_ms: 1,
            updated_at_ms: 1,
            request_id: "req-1".to_string(),
            correlation_id: "corr-1".to_string(),
            event_hash: String::new(),
            retention_tag: String::new(),
        }
    }

    const T0: i64 = 1_750_000_000_000;

    #[test]
    fn overlap_within_buffer_is_reported() {
        let open = [appointment("apt-1", AppointmentStatus::Confirmed, T0 + 90 * 60_000)];
        let conflict = find_conflict(&open, T0, 120, None).expect("conflict");
        assert_eq!(conflict.appointment_id, "apt-1");
    }

    #[test]
    fn outside_buffer_is_clear() {
        let open = [appointment("apt-1", AppointmentStatus::Confirmed, T0 + 121 * 60_000)];
        assert!(find_conflict(&open, T0, 120, None).is_none());
    }

    #[test]
    fn terminal_appointments_never_conflict() {
        let open = [
            appointment("apt-1", AppointmentStatus::Cancelled, T0),
            appointment("apt-2", AppointmentStatus::Completed, T0),
        ];
        assert!(find_conflict(&open, T0, 120, None).is_none());
    }

    #[test]
    fn the_appointment_being_decided_is_excluded() {
        let open = [appointment("apt-1", AppointmentStatus::Pending, T0)];
        assert!(find_conflict(&open, T0, 120, Some("apt-1")).is_none());
    }

    #[test]
    fn closest_overlap_wins() {
        let open = [
            appointment("far", AppointmentStatus::Confirmed, T0 + 100 * 60_000),
            appointment("near", AppointmentStatus::Pending, T0 + 10 * 60_000),
        ];
        let conflict = find_conflict(&open, T0, 120, None).expect("conflict");
        assert_eq!(conflict.appointment_id, "near");
    }
}
