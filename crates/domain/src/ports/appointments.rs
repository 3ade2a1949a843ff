use crate::DomainResult;
use crate::appointments::{Appointment, AppointmentTimelineEvent};
use crate::ports::BoxFuture;

/// Persistence port for the appointment aggregate. `create` and `update`
/// write the aggregate and its timeline event together; `update` is a
/// compare-and-swap that must fail with `DomainError::Conflict` unless the
/// stored version equals `appointment.version - 1`.
#[allow(clippy::needless_pass_by_value)]
pub trait AppointmentRepository: Send + Sync {
    fn create(
        &self,
        appointment: &Appointment,
        event: &AppointmentTimelineEvent,
    ) -> BoxFuture<'_, DomainResult<Appointment>>;

    fn update(
        &self,
        appointment: &Appointment,
        event: &AppointmentTimelineEvent,
    ) -> BoxFuture<'_, DomainResult<Appointment>>;

    fn get(&self, appointment_id: &str) -> BoxFuture<'_, DomainResult<Option<Appointment>>>;

    fn get_by_request(
        &self,
        appointment_id: &str,
        request_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Appointment>>>;

    fn get_by_actor_request(
        &self,
        user_id: &str,
        request_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Appointment>>>;

    fn list_by_match(&self, match_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>>;

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>>;

    /// Non-terminal appointments only; feeds the conflict detector.
    fn list_open_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>>;

    fn list_timeline(
        &self,
        appointment_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<AppointmentTimelineEvent>>>;
}
