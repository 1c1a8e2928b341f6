use serde_json::Value;
use tierwatch_core::{ActivityLookup, EngineError, LogTimestamp};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Remote lookup of a user's most recent logged action against a
/// MediaWiki-style `api.php` endpoint.
pub struct ActivityApi {
    agent: ureq::Agent,
    endpoint: String,
}

impl ActivityApi {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(concat!(
                "tierwatch/",
                env!("CARGO_PKG_VERSION"),
                " (role activity report bot)"
            ))
            .build();
        Self { agent, endpoint: endpoint.into() }
    }
}

impl ActivityLookup for ActivityApi {
    fn latest_logged_action(&self, username: &str) -> Result<Option<LogTimestamp>, EngineError> {
        let response = self
            .agent
            .get(&self.endpoint)
            .query("action", "query")
            .query("format", "json")
            .query("list", "logevents")
            .query("leprop", "timestamp")
            .query("leuser", username)
            .query("lelimit", "1")
            .call()
            .map_err(|err| {
                EngineError::Remote(format!("logevents request for {username} failed: {err}"))
            })?;

        let payload: Value = response.into_json().map_err(|err| {
            EngineError::Remote(format!("logevents response for {username} is not JSON: {err}"))
        })?;

        parse_latest_timestamp(&payload)
    }
}

/// Extract the most recent log-event timestamp from a `list=logevents`
/// payload. An empty event list or a missing timestamp field means the
/// user has no logged action, not an error.
///
/// # Errors
/// Returns [`EngineError::Remote`] when a present timestamp does not
/// parse as RFC3339.
pub fn parse_latest_timestamp(payload: &Value) -> Result<Option<LogTimestamp>, EngineError> {
    let events = payload
        .get("query")
        .and_then(|query| query.get("logevents"))
        .and_then(Value::as_array);
    let Some(first) = events.and_then(|events| events.first()) else {
        return Ok(None);
    };

    let raw = first.get("timestamp").and_then(Value::as_str).unwrap_or("");
    if raw.is_empty() {
        return Ok(None);
    }

    let parsed = OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| EngineError::Remote(format!("invalid logevents timestamp {raw:?}: {err}")))?;
    Ok(Some(LogTimestamp::from_datetime(parsed)))
}

/// Offline stand-in: reports no logged action for any user.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteLookup;

impl ActivityLookup for NoRemoteLookup {
    fn latest_logged_action(&self, _username: &str) -> Result<Option<LogTimestamp>, EngineError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_the_first_log_event_timestamp() {
        let payload = json!({
            "query": {
                "logevents": [
                    { "timestamp": "2024-03-01T12:30:45Z" },
                    { "timestamp": "2023-01-01T00:00:00Z" }
                ]
            }
        });
        let parsed = match parse_latest_timestamp(&payload) {
            Ok(parsed) => parsed,
            Err(err) => panic!("payload should parse: {err}"),
        };
        assert_eq!(parsed, Some(LogTimestamp::from_compact(20_240_301_123_045)));
    }

    #[test]
    fn empty_event_list_means_no_logged_action() {
        let payload = json!({ "query": { "logevents": [] } });
        assert_eq!(parse_latest_timestamp(&payload), Ok(None));
    }

    #[test]
    fn missing_query_section_means_no_logged_action() {
        let payload = json!({ "batchcomplete": "" });
        assert_eq!(parse_latest_timestamp(&payload), Ok(None));
    }

    #[test]
    fn blank_timestamp_means_no_logged_action() {
        let payload = json!({ "query": { "logevents": [ { "timestamp": "" } ] } });
        assert_eq!(parse_latest_timestamp(&payload), Ok(None));
    }

    #[test]
    fn malformed_timestamp_is_a_remote_error() {
        let payload = json!({ "query": { "logevents": [ { "timestamp": "yesterday" } ] } });
        match parse_latest_timestamp(&payload) {
            Err(EngineError::Remote(message)) => {
                assert!(message.contains("invalid logevents timestamp"));
            }
            other => panic!("expected a remote error, got {other:?}"),
        }
    }

    #[test]
    fn offline_lookup_always_reports_absence() {
        let lookup = NoRemoteLookup;
        assert_eq!(lookup.latest_logged_action("Anyone"), Ok(None));
    }
}
