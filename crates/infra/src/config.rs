use kopdar_domain::appointments::AppointmentPolicy;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub jwt_secret: String,
    pub auth_dev_bypass_enabled: bool,
    pub directory_base_url: String,
    pub directory_platform_token: String,
    pub directory_timeout_ms: u64,
    pub directory_retry_max_attempts: u32,
    pub directory_retry_backoff_base_ms: u64,
    pub directory_retry_backoff_max_ms: u64,
    pub notify_enabled: bool,
    pub notify_webhook_url: String,
    pub notify_timeout_ms: u64,
    pub appointment_min_advance_hours: i64,
    pub appointment_max_counter_offers: u32,
    pub appointment_check_in_before_minutes: i64,
    pub appointment_check_in_after_minutes: i64,
    pub appointment_check_in_radius_meters: f64,
    pub appointment_conflict_window_minutes: i64,
    pub appointment_check_in_max_attempts: u32,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "kopdar")?
            .set_default("surreal_db", "appointments")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("jwt_secret", "dev-secret")?
            .set_default("auth_dev_bypass_enabled", false)?
            .set_default("directory_base_url", "http://127.0.0.1:3100/api/v1")?
            .set_default("directory_platform_token", "dev-platform-token")?
            .set_default("directory_timeout_ms", 2_500)?
            .set_default("directory_retry_max_attempts", 3)?
            .set_default("directory_retry_backoff_base_ms", 200)?
            .set_default("directory_retry_backoff_max_ms", 2_000)?
            .set_default("notify_enabled", false)?
            .set_default("notify_webhook_url", "http://127.0.0.1:3200/notify")?
            .set_default("notify_timeout_ms", 2_000)?
            .set_default("appointment_min_advance_hours", 2)?
            .set_default("appointment_max_counter_offers", 3)?
            .set_default("appointment_check_in_before_minutes", 15)?
            .set_default("appointment_check_in_after_minutes", 30)?
            .set_default("appointment_check_in_radius_meters", 200.0)?
            .set_default("appointment_conflict_window_minutes", 120)?
            .set_default("appointment_check_in_max_attempts", 3)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn appointment_policy(&self) -> AppointmentPolicy {
        AppointmentPolicy {
            min_advance_hours: self.appointment_min_advance_hours,
            max_counter_offers: self.appointment_max_counter_offers,
            check_in_before_minutes: self.appointment_check_in_before_minutes,
            check_in_after_minutes: self.appointment_check_in_after_minutes,
            check_in_radius_meters: self.appointment_check_in_radius_meters,
            conflict_window_minutes: self.appointment_conflict_window_minutes,
            check_in_max_attempts: self.appointment_check_in_max_attempts,
        }
    }
}
