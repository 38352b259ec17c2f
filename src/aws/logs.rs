//! CloudWatch Logs client, only `GetLogEvents`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::errors::Error;

pub struct LogsClient {
    region: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct GetLogEventsResponse {
    #[serde(default)]
    events: Vec<LogEvent>,
}

#[derive(Deserialize)]
struct LogEvent {
    #[serde(default)]
    message: String,
}

impl LogsClient {
    pub fn new(region: impl Into<String>, timeout: Duration) -> Self {
        Self {
            region: region.into(),
            timeout,
        }
    }

    /// Fetch all buffered messages for a log stream, oldest first.
    ///
    /// A stream that does not exist yet is not an error; the job may simply
    /// not have produced output.
    pub async fn get_log_events(&self, group: &str, stream: &str) -> Result<Vec<String>, Error> {
        let host = format!("logs.{}.amazonaws.com", self.region);
        let body = json!({
            "logGroupName": group,
            "logStreamName": stream,
            "startFromHead": true,
        });

        let result = super::signed_post(
            &host,
            "/",
            "logs",
            &self.region,
            "application/x-amz-json-1.1",
            Some("Logs_20140328.GetLogEvents"),
            serde_json::to_vec(&body)?,
            self.timeout,
        )
        .await;

        let text = match result {
            Ok(text) => text,
            Err(Error::Backend(msg)) if msg.contains("ResourceNotFoundException") => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let parsed: GetLogEventsResponse = serde_json::from_str(&text)?;
        Ok(parsed.events.into_iter().map(|e| e.message).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_events_parsing() {
        let body = r#"{"events": [{"timestamp": 1, "message": "first"}, {"message": "second"}], "nextForwardToken": "f/1"}"#;
        let parsed: GetLogEventsResponse = serde_json::from_str(body).expect("parse");
        let messages: Vec<String> = parsed.events.into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}
