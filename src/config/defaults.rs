use super::*;

const COGNITO_ENDPOINT: &str = "https://cognito-idp.eu-west-1.amazonaws.com/";
const COGNITO_CLIENT_ID: &str = "eem5mn6iqfgf225ebg82v1k8l";
const API_BASE: &str = "https://api.asiakas.jes-extranet.com";

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            identity_endpoint: COGNITO_ENDPOINT.to_string(),
            identity_client_id: COGNITO_CLIENT_ID.to_string(),
            base_url: API_BASE.to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            window_hours: 48,
            update_minute: 15,
            cutoff_hour: 10,
            stale_hours: 6,
            resolution: Resolution::Hour,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: "/data/helmi_state.json".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/helmi.log".to_string(),
            console_output: true,
            json_format: false,
            backup_count: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: AccountConfig::default(),
            meter: MeterConfig::default(),
            api: ApiConfig::default(),
            retry: RetryConfig::default(),
            polling: PollingConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
            timezone: "Europe/Helsinki".to_string(),
        }
    }
}
