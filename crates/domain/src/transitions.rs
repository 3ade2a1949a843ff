use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::appointments::{Appointment, ParticipantRole};
use crate::error::DomainError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    OnGoing,
    Completed,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::OnGoing => "on_going",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "rejected" => Some(AppointmentStatus::Rejected),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "on_going" => Some(AppointmentStatus::OnGoing),
            "completed" => Some(AppointmentStatus::Completed),
            "no_show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Rejected
                | AppointmentStatus::Cancelled
                | AppointmentStatus::Completed
                | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppointmentAction {
    Accept,
    Decline,
    CounterOffer,
    Cancel,
    CheckIn,
    Complete,
    MarkNoShow,
}

impl AppointmentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentAction::Accept => "accept",
            AppointmentAction::Decline => "decline",
            AppointmentAction::CounterOffer => "counter_offer",
            AppointmentAction::Cancel => "cancel",
            AppointmentAction::CheckIn => "check_in",
            AppointmentAction::Complete => "complete",
            AppointmentAction::MarkNoShow => "mark_no_show",
        }
    }
}

/// The authoritative edge table. `both_checked_in` is the state of the two
/// check-in flags after the action being evaluated has been recorded.
pub fn next_status(
    from: &AppointmentStatus,
    action: &AppointmentAction,
    both_checked_in: bool,
) -> DomainResult<AppointmentStatus> {
    use AppointmentAction as Action;
    use AppointmentStatus as Status;

    let next = match (from, action) {
        (Status::Pending, Action::Accept) => Status::Confirmed,
        (Status::Pending, Action::Decline) => Status::Rejected,
        (Status::Pending, Action::CounterOffer) => Status::Pending,
        (Status::Pending | Status::Confirmed | Status::OnGoing, Action::Cancel) => {
            Status::Cancelled
        }
        (Status::Confirmed, Action::CheckIn) => {
            if both_checked_in {
                Status::OnGoing
            } else {
                Status::Confirmed
            }
        }
        (Status::OnGoing, Action::CheckIn) => Status::OnGoing,
        (Status::OnGoing, Action::Complete) => Status::Completed,
        (Status::Confirmed | Status::OnGoing, Action::MarkNoShow) => Status::NoShow,
        _ => {
            return Err(DomainError::InvalidTransition {
                from: from.as_str().to_string(),
                action: action.as_str(),
            });
        }
    };
    Ok(next)
}

/// Resolves the actor's participant role and checks that the actor may invoke
/// the action at all. Decision ownership applies to accept/decline/counter-offer;
/// the counter-offer cap is enforced here so the (N+1)-th attempt fails before
/// any state is touched. Status legality is `next_status`'s job.
pub fn ensure_permitted(
    appointment: &Appointment,
    actor_user_id: &str,
    action: &AppointmentAction,
    max_counter_offers: u32,
) -> DomainResult<ParticipantRole> {
    let role = appointment
        .participant_role(actor_user_id)
        .ok_or_else(|| DomainError::Forbidden("actor is not a participant".into()))?;

    match action {
        AppointmentAction::Accept
        | AppointmentAction::Decline
        | AppointmentAction::CounterOffer => {
            let decision_user = appointment.current_decision_user_id.as_deref().ok_or(
                DomainError::InvalidTransition {
                    from: appointment.status.as_str().to_string(),
                    action: action.as_str(),
                },
            )?;
            if decision_user != actor_user_id {
                return Err(DomainError::Forbidden(
                    "it is the other participant's turn to respond".into(),
                ));
            }
            if matches!(action, AppointmentAction::CounterOffer)
                && appointment.counter_offer_count >= max_counter_offers
            {
                return Err(DomainError::CounterOfferLimit {
                    max: max_counter_offers,
                });
            }
        }
        AppointmentAction::Cancel
        | AppointmentAction::CheckIn
        | AppointmentAction::Complete => {}
        AppointmentAction::MarkNoShow => {
            return Err(DomainError::Forbidden(
                "no-show is recorded by the platform sweep, not by participants".into(),
            ));
        }
    }

    Ok(role)
}
