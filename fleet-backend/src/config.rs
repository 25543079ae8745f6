use std::env;

use crate::models::DeviceClass;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Base URL of the local window-vendor API.
    pub vendor_api_url: String,
    /// Directory holding one automation executable per workflow kind.
    pub scripts_dir: String,
    /// Device class every task window must have.
    pub device_class: DeviceClass,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8090".to_string())
                .parse()
                .expect("PORT must be a valid number"),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "./.db/fleet.db".to_string()),
            vendor_api_url: env::var("WINDOW_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:54345".to_string()),
            scripts_dir: env::var("WORKFLOW_SCRIPTS_DIR")
                .unwrap_or_else(|_| "./automation".to_string()),
            device_class: env::var("WINDOW_DEVICE_CLASS")
                .ok()
                .and_then(|v| DeviceClass::parse(&v))
                .unwrap_or(DeviceClass::Mobile),
        }
    }
}
