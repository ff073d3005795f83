//! Log upload DTOs

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::log::LogLine;

/// Batch of lines sent from the shipper to the ingestion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogUploadRequest {
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub lines: Vec<LogLine>,
    pub deployment_id: i64,
    pub hostname: String,
}

/// Which phase of a deployment the supervised process belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    /// Output of an image build
    Build,
    /// Output of the running application
    Runtime,
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogType::Build => write!(f, "build"),
            LogType::Runtime => write!(f, "runtime"),
        }
    }
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(LogType::Build),
            "runtime" => Ok(LogType::Runtime),
            other => Err(format!(
                "unknown log type '{}', expected 'build' or 'runtime'",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::log::Stream;

    #[test]
    fn test_upload_request_wire_format() {
        let request = LogUploadRequest {
            log_type: LogType::Runtime,
            lines: vec![LogLine::with_timestamp(
                Stream::Stdout,
                "hi",
                1_700_000_000_000,
            )],
            deployment_id: 123,
            hostname: "web-0".to_string(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "runtime",
                "lines": [
                    {"content": "hi", "stream": "stdout", "timestamp": 1_700_000_000_000i64}
                ],
                "deploymentId": 123,
                "hostname": "web-0",
            })
        );
    }

    #[test]
    fn test_log_type_parsing() {
        assert_eq!("build".parse::<LogType>(), Ok(LogType::Build));
        assert_eq!("runtime".parse::<LogType>(), Ok(LogType::Runtime));
        assert!("".parse::<LogType>().is_err());
        assert!("Build".parse::<LogType>().is_err());
    }
}
