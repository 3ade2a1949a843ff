use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BoxFuture;

/// Read-side view of the matching platform: which two users a match pairs,
/// and who owns a pet. The engine never writes through this port.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error("directory response invalid: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchRecord {
    pub match_id: String,
    pub user_a_id: String,
    pub user_b_id: String,
    pub active: bool,
}

impl MatchRecord {
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.user_a_id == user_id {
            Some(self.user_b_id.as_str())
        } else if self.user_b_id == user_id {
            Some(self.user_a_id.as_str())
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PetRecord {
    pub pet_id: String,
    pub owner_id: String,
    pub name: String,
}

pub trait MatchDirectory: Send + Sync {
    fn get_match(
        &self,
        match_id: &str,
    ) -> BoxFuture<'_, Result<Option<MatchRecord>, DirectoryError>>;

    fn get_pet(&self, pet_id: &str) -> BoxFuture<'_, Result<Option<PetRecord>, DirectoryError>>;
}
