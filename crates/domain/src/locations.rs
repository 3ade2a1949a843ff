use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::auth::Role;
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::locations::LocationRepository;
use crate::util::now_ms;

const MAX_NAME_LEN: usize = 160;
const MAX_ADDRESS_LEN: usize = 256;
pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const MAX_RECENT_LIMIT: usize = 50;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaceType {
    Park,
    Cafe,
    PetShop,
    Clinic,
    Other,
}

impl PlaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceType::Park => "park",
            PlaceType::Cafe => "cafe",
            PlaceType::PetShop => "pet_shop",
            PlaceType::Clinic => "clinic",
            PlaceType::Other => "other",
        }
    }
}

/// A reusable preset meeting place owned by the user who saved it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub location_id: String,
    pub owner_id: String,
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub district: String,
    pub place_type: PlaceType,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// The copy embedded in an appointment. Presets may be edited or removed
/// later without rewriting history, so the appointment never holds a live
/// reference.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocationSnapshot {
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub district: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CustomLocation {
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub district: Option<String>,
}

#[derive(Clone, Debug)]
pub enum LocationInput {
    Preset { location_id: String },
    Custom(CustomLocation),
}

#[derive(Clone, Debug)]
pub struct CreateLocation {
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub district: String,
    pub place_type: PlaceType,
    pub request_id: String,
    pub correlation_id: String,
    pub request_ts_ms: Option<i64>,
}

#[derive(Clone)]
pub struct LocationService {
    repository: Arc<dyn LocationRepository>,
}

impl LocationService {
    pub fn new(repository: Arc<dyn LocationRepository>) -> Self {
        Self { repository }
    }

    pub async fn create_location(
        &self,
        actor: ActorIdentity,
        role: &Role,
        input: CreateLocation,
    ) -> DomainResult<Location> {
        if matches!(role, Role::Anonymous) {
            return Err(DomainError::Forbidden(
                "anonymous actor is not allowed".into(),
            ));
        }
        let input = validate_create_location(input)?;
        let now = input.request_ts_ms.unwrap_or_else(now_ms);
        let location = Location {
            location_id: crate::util::uuid_v7_without_dashes(),
            owner_id: actor.user_id,
            name: input.name,
            address: input.address,
            latitude: input.latitude,
            longitude: input.longitude,
            city: input.city,
            district: input.district,
            place_type: input.place_type,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.repository.create(&location).await
    }

    pub async fn get(&self, location_id: &str) -> DomainResult<Location> {
        self.repository
            .get(location_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    pub async fn list_recent(
        &self,
        owner_id: &str,
        limit: Option<usize>,
    ) -> DomainResult<Vec<Location>> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(MAX_RECENT_LIMIT);
        let mut locations = self.repository.list_recent_by_owner(owner_id, limit).await?;
        locations.sort_by(|left, right| {
            right
                .created_at_ms
                .cmp(&left.created_at_ms)
                .then_with(|| right.location_id.cmp(&left.location_id))
        });
        locations.truncate(limit);
        Ok(locations)
    }

    /// Produces the snapshot to embed in an appointment. Preset fields are
    /// copied at resolution time; custom payloads are validated and stored
    /// as given.
    pub async fn resolve(&self, input: &LocationInput) -> DomainResult<LocationSnapshot> {
        match input {
            LocationInput::Preset { location_id } => {
                let location = self.get(location_id).await?;
                Ok(LocationSnapshot {
                    name: location.name,
                    address: location.address,
                    latitude: location.latitude,
                    longitude: location.longitude,
                    city: Some(location.city),
                    district: Some(location.district),
                })
            }
            LocationInput::Custom(custom) => snapshot_from_custom(custom),
        }
    }
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> DomainResult<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(DomainError::Validation(format!(
            "latitude {latitude} is out of range"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(DomainError::Validation(format!(
            "longitude {longitude} is out of range"
        )));
    }
    Ok(())
}

fn snapshot_from_custom(custom: &CustomLocation) -> DomainResult<LocationSnapshot> {
    let name = custom.name.trim();
    let address = custom.address.trim();
    if name.is_empty() {
        return Err(DomainError::Validation("location name is required".into()));
    }
    if address.is_empty() {
        return Err(DomainError::Validation(
            "location address is required".into(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::Validation(format!(
            "location name exceeds max length of {MAX_NAME_LEN}"
        )));
    }
    if address.chars().count() > MAX_ADDRESS_LEN {
        return Err(DomainError::Validation(format!(
            "location address exceeds max length of {MAX_ADDRESS_LEN}"
        )));
    }
    validate_coordinates(custom.latitude, custom.longitude)?;
    Ok(LocationSnapshot {
        name: name.to_string(),
        address: address.to_string(),
        latitude: custom.latitude,
        longitude: custom.longitude,
        city: custom.city.as_ref().map(|city| city.trim().to_string()),
        district: custom
            .district
            .as_ref()
            .map(|district| district.trim().to_string()),
    })
}

fn validate_create_location(mut input: CreateLocation) -> DomainResult<CreateLocation> {
    input.name = input.name.trim().to_string();
    input.address = input.address.trim().to_string();
    input.city = input.city.trim().to_string();
    input.district = input.district.trim().to_string();

    if input.name.is_empty() || input.address.is_empty() {
        return Err(DomainError::Validation(
            "location name and address are required".into(),
        ));
    }
    if input.name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::Validation(format!(
            "location name exceeds max length of {MAX_NAME_LEN}"
        )));
    }
    if input.address.chars().count() > MAX_ADDRESS_LEN {
        return Err(DomainError::Validation(format!(
            "location address exceeds max length of {MAX_ADDRESS_LEN}"
        )));
    }
    validate_coordinates(input.latitude, input.longitude)?;
    Ok(input)
}
