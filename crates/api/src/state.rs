use std::sync::Arc;

use kopdar_domain::appointments::AppointmentService;
use kopdar_domain::locations::LocationService;
use kopdar_domain::ports::appointments::AppointmentRepository;
use kopdar_domain::ports::directory::MatchDirectory;
use kopdar_domain::ports::locations::LocationRepository;
use kopdar_domain::ports::notify::NotificationSender;
use kopdar_infra::config::AppConfig;
use kopdar_infra::db::DbConfig;
use kopdar_infra::directory::DirectoryHttpClient;
use kopdar_infra::notify::{NoopNotifier, WebhookNotifier};
use kopdar_infra::repositories::{
    InMemoryAppointmentRepository, InMemoryLocationRepository, SurrealAppointmentRepository,
    SurrealLocationRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub appointment_repo: Arc<dyn AppointmentRepository>,
    pub location_repo: Arc<dyn LocationRepository>,
    pub directory: Arc<dyn MatchDirectory>,
    pub notifier: Arc<dyn NotificationSender>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let (appointment_repo, location_repo): (
            Arc<dyn AppointmentRepository>,
            Arc<dyn LocationRepository>,
        ) = if config.data_backend.eq_ignore_ascii_case("surreal") {
            let db_config = DbConfig::from_app_config(&config);
            (
                Arc::new(SurrealAppointmentRepository::new(&db_config).await?),
                Arc::new(SurrealLocationRepository::new(&db_config).await?),
            )
        } else {
            (
                Arc::new(InMemoryAppointmentRepository::new()),
                Arc::new(InMemoryLocationRepository::new()),
            )
        };

        let directory: Arc<dyn MatchDirectory> =
            Arc::new(DirectoryHttpClient::from_config(&config)?);
        let notifier: Arc<dyn NotificationSender> = if config.notify_enabled {
            Arc::new(WebhookNotifier::from_config(&config)?)
        } else {
            Arc::new(NoopNotifier)
        };

        Ok(Self {
            config,
            appointment_repo,
            location_repo,
            directory,
            notifier,
        })
    }

    #[allow(dead_code)]
    pub fn with_components(
        config: AppConfig,
        appointment_repo: Arc<dyn AppointmentRepository>,
        location_repo: Arc<dyn LocationRepository>,
        directory: Arc<dyn MatchDirectory>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            config,
            appointment_repo,
            location_repo,
            directory,
            notifier,
        }
    }

    pub fn appointment_service(&self) -> AppointmentService {
        AppointmentService::new(
            self.appointment_repo.clone(),
            self.location_service(),
            self.directory.clone(),
            self.notifier.clone(),
            self.config.appointment_policy(),
        )
    }

    pub fn location_service(&self) -> LocationService {
        LocationService::new(self.location_repo.clone())
    }
}
