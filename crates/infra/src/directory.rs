use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio::time::sleep;

use kopdar_domain::ports::BoxFuture;
use kopdar_domain::ports::directory::{DirectoryError, MatchDirectory, MatchRecord, PetRecord};

use crate::config::AppConfig;

const PLATFORM_TOKEN_HEADER: &str = "X-Platform-Token";

/// Read client for the matching platform. The platform owns identity,
/// matches and pet profiles; this service only looks them up.
#[derive(Clone)]
pub struct DirectoryHttpClient {
    http: reqwest::Client,
    base_url: String,
    platform_token: String,
    retry_max_attempts: u32,
    retry_backoff_base_ms: u64,
    retry_backoff_max_ms: u64,
}

impl DirectoryHttpClient {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.directory_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: config.directory_base_url.trim_end_matches('/').to_string(),
            platform_token: config.directory_platform_token.clone(),
            retry_max_attempts: config.directory_retry_max_attempts.max(1),
            retry_backoff_base_ms: config.directory_retry_backoff_base_ms,
            retry_backoff_max_ms: config.directory_retry_backoff_max_ms,
        })
    }

    async fn get_json<T>(&self, path: &str) -> Result<Option<T>, DirectoryError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .http
                .get(&url)
                .header(PLATFORM_TOKEN_HEADER, &self.platform_token)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map(Some)
                            .map_err(|err| DirectoryError::Decode(err.to_string()));
                    }
                    if !status.is_server_error() || attempt >= self.retry_max_attempts {
                        return Err(DirectoryError::Unavailable(format!(
                            "directory returned {status} for {path}"
                        )));
                    }
                    tracing::warn!(%status, attempt, path, "directory request failed; retrying");
                }
                Err(err) => {
                    if attempt >= self.retry_max_attempts {
                        return Err(DirectoryError::Unavailable(err.to_string()));
                    }
                    tracing::warn!(error = %err, attempt, path, "directory request failed; retrying");
                }
            }
            sleep(Duration::from_millis(backoff_ms(
                self.retry_backoff_base_ms,
                attempt,
                self.retry_backoff_max_ms,
            )))
            .await;
        }
    }
}

impl MatchDirectory for DirectoryHttpClient {
    fn get_match(
        &self,
        match_id: &str,
    ) -> BoxFuture<'_, Result<Option<MatchRecord>, DirectoryError>> {
        let path = format!("/matches/{match_id}");
        Box::pin(async move { self.get_json::<MatchRecord>(&path).await })
    }

    fn get_pet(&self, pet_id: &str) -> BoxFuture<'_, Result<Option<PetRecord>, DirectoryError>> {
        let path = format!("/pets/{pet_id}");
        Box::pin(async move { self.get_json::<PetRecord>(&path).await })
    }
}

fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(pow).min(max_ms)
}

/// Seedable directory for the `memory` backend and tests.
#[derive(Default)]
pub struct InMemoryDirectory {
    matches: RwLock<HashMap<String, MatchRecord>>,
    pets: RwLock<HashMap<String, PetRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_match(&self, record: MatchRecord) {
        self.matches
            .write()
            .await
            .insert(record.match_id.clone(), record);
    }

    pub async fn seed_pet(&self, record: PetRecord) {
        self.pets
            .write()
            .await
            .insert(record.pet_id.clone(), record);
    }
}

impl MatchDirectory for InMemoryDirectory {
    fn get_match(
        &self,
        match_id: &str,
    ) -> BoxFuture<'_, Result<Option<MatchRecord>, DirectoryError>> {
        let match_id = match_id.to_string();
        Box::pin(async move {
            let matches = self.matches.read().await;
            Ok(matches.get(&match_id).cloned())
        })
    }

    fn get_pet(&self, pet_id: &str) -> BoxFuture<'_, Result<Option<PetRecord>, DirectoryError>> {
        let pet_id = pet_id.to_string();
        Box::pin(async move {
            let pets = self.pets.read().await;
            Ok(pets.get(&pet_id).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        assert_eq!(backoff_ms(200, 1, 2_000), 200);
        assert_eq!(backoff_ms(200, 2, 2_000), 400);
        assert_eq!(backoff_ms(200, 3, 2_000), 800);
        assert_eq!(backoff_ms(200, 10, 2_000), 2_000);
    }

    #[tokio::test]
    async fn in_memory_directory_round_trips() {
        let directory = InMemoryDirectory::new();
        directory
            .seed_match(MatchRecord {
                match_id: "match-1".to_string(),
                user_a_id: "user-a".to_string(),
                user_b_id: "user-b".to_string(),
                active: true,
            })
            .await;
        let record = directory
            .get_match("match-1")
            .await
            .expect("lookup")
            .expect("seeded");
        assert_eq!(record.counterpart_of("user-a"), Some("user-b"));
        assert!(directory.get_match("match-2").await.expect("lookup").is_none());
    }
}
