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
use kopdar_domain::error::DomainError;
use kopdar_domain::locations::Location;
use kopdar_domain::ports::BoxFuture;
use kopdar_domain::ports::locations::LocationRepository;

use crate::db::DbConfig;

#[derive(Default)]
pub struct InMemoryLocationRepository {
    items: Arc<RwLock<HashMap<String, Location>>>,
}

impl InMemoryLocationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationRepository for InMemoryLocationRepository {
    fn create(&self, location: &Location) -> BoxFuture<'_, DomainResult<Location>> {
        let location = location.clone();
        Box::pin(async move {
            let mut items = self.items.write().await;
            if items.contains_key(&location.location_id) {
                return Err(DomainError::Conflict);
            }
            items.insert(location.location_id.clone(), location.clone());
            Ok(location)
        })
    }

    fn get(&self, location_id: &str) -> BoxFuture<'_, DomainResult<Option<Location>>> {
        let location_id = location_id.to_string();
        Box::pin(async move {
            let items = self.items.read().await;
            Ok(items.get(&location_id).cloned())
        })
    }

    fn list_recent_by_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<Location>>> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let items = self.items.read().await;
            let mut locations: Vec<_> = items
                .values()
                .filter(|location| location.owner_id == owner_id)
                .cloned()
                .collect();
            locations.sort_by(|left, right| {
                right
                    .created_at_ms
                    .cmp(&left.created_at_ms)
                    .then_with(|| right.location_id.cmp(&left.location_id))
            });
            locations.truncate(limit);
            Ok(locations)
        })
    }
}

pub struct SurrealLocationRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealLocationRepository {
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

    fn decode_many(rows: Vec<Value>) -> DomainResult<Vec<Location>> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<Location>(row)
                    .map_err(|err| DomainError::Internal(format!("invalid location row: {err}")))
            })
            .collect()
    }
}

impl LocationRepository for SurrealLocationRepository {
    fn create(&self, location: &Location) -> BoxFuture<'_, DomainResult<Location>> {
        let location = location.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let payload = to_value(&location)
                .map_err(|err| DomainError::Internal(format!("invalid location payload: {err}")))?;
            let mut response = client
                .query("CREATE type::record('location', $location_id) CONTENT $payload")
                .bind(("location_id", location.location_id.clone()))
                .bind(("payload", payload))
                .await
                .map_err(Self::map_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            let mut created = Self::decode_many(rows)?;
            created
                .pop()
                .ok_or_else(|| DomainError::Internal("create returned no row".to_string()))
        })
    }

    fn get(&self, location_id: &str) -> BoxFuture<'_, DomainResult<Option<Location>>> {
        let location_id = location_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * FROM location WHERE location_id = $location_id LIMIT 1")
                .bind(("location_id", location_id))
                .await
                .map_err(Self::map_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            let mut decoded = Self::decode_many(rows)?;
            Ok(decoded.pop())
        })
    }

    fn list_recent_by_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<Location>>> {
        let owner_id = owner_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * FROM location WHERE owner_id = $owner_id \
                     ORDER BY created_at_ms DESC LIMIT $limit",
                )
                .bind(("owner_id", owner_id))
                .bind(("limit", limit))
                .await
                .map_err(Self::map_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            Self::decode_many(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopdar_domain::locations::PlaceType;

    fn location(id: &str, owner: &str, created_at_ms: i64) -> Location {
        Location {
            location_id: id.to_string(),
            owner_id: owner.to_string(),
            name: format!("Spot {id}"),
            address: "Jl. HOS Cokroaminoto".to_string(),
            latitude: -6.196,
            longitude: 106.829,
            city: "Jakarta".to_string(),
            district: "Menteng".to_string(),
            place_type: PlaceType::Park,
            created_at_ms,
            updated_at_ms: created_at_ms,
        }
    }

    #[tokio::test]
    async fn recent_listing_is_newest_first_and_bounded() {
        let repo = InMemoryLocationRepository::new();
        for idx in 0..5 {
            repo.create(&location(&format!("loc-{idx}"), "user-1", idx))
                .await
                .expect("create");
        }
        repo.create(&location("loc-other", "user-2", 99))
            .await
            .expect("create");

        let recent = repo
            .list_recent_by_owner("user-1", 3)
            .await
            .expect("recent");
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].location_id, "loc-4");
        assert_eq!(recent[2].location_id, "loc-2");
    }

    #[tokio::test]
    async fn duplicate_id_create_conflicts() {
        let repo = InMemoryLocationRepository::new();
        repo.create(&location("loc-1", "user-1", 1))
            .await
            .expect("create");
        let err = repo
            .create(&location("loc-1", "user-1", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict));
    }
}
