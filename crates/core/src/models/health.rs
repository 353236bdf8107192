//! Backend readiness models (`GET /health/ready`)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Readiness as shown on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Raw readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub checks: Map<String, Value>,
}

impl HealthResponse {
    pub fn health_status(&self) -> HealthStatus {
        match self.status.as_str() {
            "ok" => HealthStatus::Healthy,
            "degraded" => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let ok: HealthResponse = serde_json::from_str(r#"{"status":"ok","checks":{}}"#).unwrap();
        assert_eq!(ok.health_status(), HealthStatus::Healthy);
        let deg: HealthResponse = serde_json::from_str(r#"{"status":"degraded"}"#).unwrap();
        assert_eq!(deg.health_status(), HealthStatus::Degraded);
        let bad: HealthResponse = serde_json::from_str(r#"{"status":"down"}"#).unwrap();
        assert_eq!(bad.health_status(), HealthStatus::Unhealthy);
    }
}
