use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, to_value};
use surrealdb::{
    Surreal,
    engine::remote::ws::{Client, Ws},
    opt::auth::Root,
};
use tokio::sync::RwLock;

use kopdar_domain::DomainResult;
use kopdar_domain::appointments::{Appointment, AppointmentTimelineEvent};
use kopdar_domain::error::DomainError;
use kopdar_domain::ports::BoxFuture;
use kopdar_domain::ports::appointments::AppointmentRepository;

use crate::db::DbConfig;

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    items: Arc<RwLock<HashMap<String, Appointment>>>,
    timeline: Arc<RwLock<Vec<AppointmentTimelineEvent>>>,
}

impl InMemoryAppointmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppointmentRepository for InMemoryAppointmentRepository {
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
            let duplicate_request = items.values().any(|existing| {
                existing.request_id == appointment.request_id
                    && existing
                        .participant_role(&appointment.inviter.user_id)
                        .is_some()
            });
            if duplicate_request {
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
            // compare-and-swap on the version the caller loaded
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
        Box::pin(async move {
            let items = self.items.read().await;
            Ok(items.get(&appointment_id).cloned())
        })
    }

    fn get_by_request(
        &self,
        appointment_id: &str,
        request_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Appointment>>> {
        let appointment_id = appointment_id.to_string();
        let request_id = request_id.to_string();
        Box::pin(async move {
            let items = self.items.read().await;
            Ok(items
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
            let items = self.items.read().await;
            Ok(items
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
            let items = self.items.read().await;
            Ok(items
                .values()
                .filter(|appointment| appointment.match_id == match_id)
                .cloned()
                .collect())
        })
    }

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let items = self.items.read().await;
            Ok(items
                .values()
                .filter(|appointment| appointment.participant_role(&user_id).is_some())
                .cloned()
                .collect())
        })
    }

    fn list_open_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let items = self.items.read().await;
            Ok(items
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
            let timeline = self.timeline.read().await;
            Ok(timeline
                .iter()
                .filter(|event| event.appointment_id == appointment_id)
                .cloned()
                .collect())
        })
    }
}

pub struct SurrealAppointmentRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealAppointmentRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        let db = Surreal::<Client>::init();
        db.connect::<Ws>(&db_config.endpoint).await?;
        db.signin(Root {
            username: db_config.username.clone(),
            password: db_config.password.clone(),
        })
        .await?;
        db.use_ns(&db_config.namespace)
            .use_db(&db_config.database)
            .await?;
        Ok(Self {
            client: Arc::new(db),
        })
    }

    fn map_error(err: surrealdb::Error) -> DomainError {
        let message = err.to_string().to_lowercase();
        if message.contains("already exists")
            || message.contains("duplicate")
            || message.contains("unique")
            || message.contains("conflict")
        {
            return DomainError::Conflict;
        }
        DomainError::Internal(format!("surreal query failed: {message}"))
    }

    fn decode_one<T>(rows: Vec<Value>, context: &str) -> DomainResult<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let decoded = serde_json::from_value::<T>(row)
            .map_err(|err| DomainError::Internal(format!("invalid {context} row: {err}")))?;
        Ok(Some(decoded))
    }

    fn decode_many<T>(rows: Vec<Value>, context: &str) -> DomainResult<Vec<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<T>(row)
                    .map_err(|err| DomainError::Internal(format!("invalid {context} row: {err}")))
            })
            .collect()
    }

    async fn select_rows(
        client: &Surreal<Client>,
        query: &str,
        binds: Vec<(&'static str, Value)>,
    ) -> DomainResult<Vec<Value>> {
        let mut pending = client.query(query);
        for (key, value) in binds {
            pending = pending.bind((key, value));
        }
        let mut response = pending.await.map_err(Self::map_error)?;
        response
            .take(0)
            .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))
    }

    async fn create_event(
        client: &Surreal<Client>,
        event: &AppointmentTimelineEvent,
    ) -> DomainResult<()> {
        let payload = to_value(event)
            .map_err(|err| DomainError::Internal(format!("invalid timeline payload: {err}")))?;
        let mut response = client
            .query("CREATE type::record('appointment_event', $event_id) CONTENT $payload")
            .bind(("event_id", event.event_id.clone()))
            .bind(("payload", payload))
            .await
            .map_err(Self::map_error)?;
        let _rows: Vec<Value> = response
            .take(0)
            .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
        Ok(())
    }
}

impl AppointmentRepository for SurrealAppointmentRepository {
    fn create(
        &self,
        appointment: &Appointment,
        event: &AppointmentTimelineEvent,
    ) -> BoxFuture<'_, DomainResult<Appointment>> {
        let appointment = appointment.clone();
        let event = event.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let existing = Self::select_rows(
                &client,
                "SELECT * FROM appointment \
                 WHERE request_id = $request_id \
                 AND (inviter.user_id = $user_id OR invitee.user_id = $user_id) \
                 LIMIT 1",
                vec![
                    ("request_id", Value::from(event.request_id.clone())),
                    (
                        "user_id",
                        Value::from(appointment.inviter.user_id.clone()),
                    ),
                ],
            )
            .await?;
            if let Some(existing) = Self::decode_one::<Appointment>(existing, "appointment")? {
                return Ok(existing);
            }

            let payload = to_value(&appointment)
                .map_err(|err| DomainError::Internal(format!("invalid appointment payload: {err}")))?;
            let mut response = client
                .query("CREATE type::record('appointment', $appointment_id) CONTENT $payload")
                .bind(("appointment_id", appointment.appointment_id.clone()))
                .bind(("payload", payload))
                .await
                .map_err(Self::map_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            let created = Self::decode_one::<Appointment>(rows, "appointment")?
                .ok_or_else(|| DomainError::Internal("create returned no row".to_string()))?;

            if let Err(err) = Self::create_event(&client, &event).await {
                let _ = client
                    .query("DELETE appointment WHERE appointment_id = $appointment_id")
                    .bind(("appointment_id", appointment.appointment_id.clone()))
                    .await;
                return Err(err);
            }
            Ok(created)
        })
    }

    fn update(
        &self,
        appointment: &Appointment,
        event: &AppointmentTimelineEvent,
    ) -> BoxFuture<'_, DomainResult<Appointment>> {
        let appointment = appointment.clone();
        let event = event.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let payload = to_value(&appointment)
                .map_err(|err| DomainError::Internal(format!("invalid appointment payload: {err}")))?;
            let expected_version = appointment.version - 1;
            let rows = Self::select_rows(
                &client,
                "UPDATE appointment CONTENT $payload \
                 WHERE appointment_id = $appointment_id AND version = $expected_version",
                vec![
                    ("payload", payload),
                    (
                        "appointment_id",
                        Value::from(appointment.appointment_id.clone()),
                    ),
                    ("expected_version", Value::from(expected_version)),
                ],
            )
            .await?;
            let Some(updated) = Self::decode_one::<Appointment>(rows, "appointment")? else {
                // nothing matched: distinguish a missing row from a stale version
                let existing = Self::select_rows(
                    &client,
                    "SELECT * FROM appointment WHERE appointment_id = $appointment_id LIMIT 1",
                    vec![(
                        "appointment_id",
                        Value::from(appointment.appointment_id.clone()),
                    )],
                )
                .await?;
                return if existing.is_empty() {
                    Err(DomainError::NotFound)
                } else {
                    Err(DomainError::Conflict)
                };
            };

            Self::create_event(&client, &event).await?;
            Ok(updated)
        })
    }

    fn get(&self, appointment_id: &str) -> BoxFuture<'_, DomainResult<Option<Appointment>>> {
        let appointment_id = appointment_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let rows = Self::select_rows(
                &client,
                "SELECT * FROM appointment WHERE appointment_id = $appointment_id LIMIT 1",
                vec![("appointment_id", Value::from(appointment_id))],
            )
            .await?;
            Self::decode_one(rows, "appointment")
        })
    }

    fn get_by_request(
        &self,
        appointment_id: &str,
        request_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Appointment>>> {
        let appointment_id = appointment_id.to_string();
        let request_id = request_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let rows = Self::select_rows(
                &client,
                "SELECT * FROM appointment \
                 WHERE appointment_id = $appointment_id AND request_id = $request_id \
                 LIMIT 1",
                vec![
                    ("appointment_id", Value::from(appointment_id)),
                    ("request_id", Value::from(request_id)),
                ],
            )
            .await?;
            Self::decode_one(rows, "appointment")
        })
    }

    fn get_by_actor_request(
        &self,
        user_id: &str,
        request_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Appointment>>> {
        let user_id = user_id.to_string();
        let request_id = request_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let rows = Self::select_rows(
                &client,
                "SELECT * FROM appointment \
                 WHERE request_id = $request_id \
                 AND (inviter.user_id = $user_id OR invitee.user_id = $user_id) \
                 LIMIT 1",
                vec![
                    ("request_id", Value::from(request_id)),
                    ("user_id", Value::from(user_id)),
                ],
            )
            .await?;
            Self::decode_one(rows, "appointment")
        })
    }

    fn list_by_match(&self, match_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>> {
        let match_id = match_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let rows = Self::select_rows(
                &client,
                "SELECT * FROM appointment WHERE match_id = $match_id \
                 ORDER BY created_at_ms DESC",
                vec![("match_id", Value::from(match_id))],
            )
            .await?;
            Self::decode_many(rows, "appointment")
        })
    }

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let rows = Self::select_rows(
                &client,
                "SELECT * FROM appointment \
                 WHERE inviter.user_id = $user_id OR invitee.user_id = $user_id \
                 ORDER BY created_at_ms DESC",
                vec![("user_id", Value::from(user_id))],
            )
            .await?;
            Self::decode_many(rows, "appointment")
        })
    }

    fn list_open_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Appointment>>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let rows = Self::select_rows(
                &client,
                "SELECT * FROM appointment \
                 WHERE (inviter.user_id = $user_id OR invitee.user_id = $user_id) \
                 AND status NOT IN ['rejected', 'cancelled', 'completed', 'no_show'] \
                 ORDER BY scheduled_at_ms ASC",
                vec![("user_id", Value::from(user_id))],
            )
            .await?;
            Self::decode_many(rows, "appointment")
        })
    }

    fn list_timeline(
        &self,
        appointment_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<AppointmentTimelineEvent>>> {
        let appointment_id = appointment_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let rows = Self::select_rows(
                &client,
                "SELECT * FROM appointment_event \
                 WHERE appointment_id = $appointment_id \
                 ORDER BY occurred_at_ms ASC, event_id ASC",
                vec![("appointment_id", Value::from(appointment_id))],
            )
            .await?;
            Self::decode_many(rows, "appointment_event")
        })
    }
}
