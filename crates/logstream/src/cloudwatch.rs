// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CloudWatch Logs client over the JSON 1.1 protocol.
//!
//! Every call is a `POST /` with the action named in `X-Amz-Target`. Requests
//! are not signed: point the endpoint at a signing proxy, a VPC endpoint that
//! accepts the caller, or a local emulator.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::SinkError;
use crate::line::{Destination, OrderingToken, SinkEntry};
use crate::sink::{DestinationProvisioner, PutOutcome, Sink};

const TARGET_PREFIX: &str = "Logs_20140328";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

const INVALID_SEQUENCE_TOKEN: &str = "InvalidSequenceTokenException";
const DATA_ALREADY_ACCEPTED: &str = "DataAlreadyAcceptedException";
const RESOURCE_ALREADY_EXISTS: &str = "ResourceAlreadyExistsException";

/// Public CloudWatch Logs endpoint of `region`.
#[must_use]
pub fn regional_endpoint(region: &str) -> String {
    format!("https://logs.{region}.amazonaws.com")
}

#[derive(Debug, Clone)]
pub struct CloudWatchLogs {
    client: reqwest::Client,
    endpoint: String,
}

impl CloudWatchLogs {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn call<Req, Resp>(&self, action: &str, request: &Req) -> Result<Resp, SinkError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Default,
    {
        let body = serde_json::to_vec(request)
            .map_err(|e| SinkError::Malformed(format!("failed to encode {action}: {e}")))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{action}"))
            .header("Content-Type", CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(format!("{action}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SinkError::Transport(format!("{action}: {e}")))?;

        if !status.is_success() {
            debug!("CLOUDWATCH | {action} failed with {status}: {text}");
            return Err(api_error(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Resp::default());
        }
        serde_json::from_str(&text)
            .map_err(|e| SinkError::Malformed(format!("{action} response: {e}")))
    }

    async fn group_exists(&self, group: &str) -> Result<bool, SinkError> {
        let mut next_token: Option<String> = None;
        loop {
            let page: DescribeLogGroupsResponse = self
                .call(
                    "DescribeLogGroups",
                    &DescribeLogGroupsRequest {
                        log_group_name_prefix: group,
                        next_token: next_token.as_deref(),
                    },
                )
                .await?;
            if page.log_groups.iter().any(|g| g.log_group_name == group) {
                return Ok(true);
            }
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(false),
            }
        }
    }

    async fn stream_exists(&self, destination: &Destination) -> Result<bool, SinkError> {
        let mut next_token: Option<String> = None;
        loop {
            let page: DescribeLogStreamsResponse = self
                .call(
                    "DescribeLogStreams",
                    &DescribeLogStreamsRequest {
                        log_group_name: &destination.group,
                        log_stream_name_prefix: &destination.stream,
                        next_token: next_token.as_deref(),
                    },
                )
                .await?;
            if page
                .log_streams
                .iter()
                .any(|s| s.log_stream_name == destination.stream)
            {
                return Ok(true);
            }
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(false),
            }
        }
    }
}

#[async_trait]
impl DestinationProvisioner for CloudWatchLogs {
    async fn ensure_exists(
        &self,
        destination: &Destination,
        retention_days: i32,
    ) -> Result<(), SinkError> {
        let group = destination.group.as_str();

        if !self.group_exists(group).await? {
            info!("CLOUDWATCH | Creating log group {group}");
            tolerate_existing(
                self.call::<_, Empty>("CreateLogGroup", &CreateLogGroupRequest {
                    log_group_name: group,
                })
                .await,
            )?;
            self.call::<_, Empty>(
                "PutRetentionPolicy",
                &PutRetentionPolicyRequest {
                    log_group_name: group,
                    retention_in_days: retention_days,
                },
            )
            .await?;
        }

        if !self.stream_exists(destination).await? {
            info!(
                "CLOUDWATCH | Creating log stream {} in {group}",
                destination.stream
            );
            tolerate_existing(
                self.call::<_, Empty>(
                    "CreateLogStream",
                    &CreateLogStreamRequest {
                        log_group_name: group,
                        log_stream_name: &destination.stream,
                    },
                )
                .await,
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for CloudWatchLogs {
    async fn put_entries(
        &self,
        destination: &Destination,
        entries: &[SinkEntry],
        token: Option<&OrderingToken>,
    ) -> Result<PutOutcome, SinkError> {
        let request = PutLogEventsRequest {
            log_group_name: &destination.group,
            log_stream_name: &destination.stream,
            log_events: entries
                .iter()
                .map(|entry| InputLogEvent {
                    message: &entry.message,
                    timestamp: entry.timestamp_ms,
                })
                .collect(),
            sequence_token: token.map(OrderingToken::as_str),
        };

        let response: PutLogEventsResponse = self.call("PutLogEvents", &request).await?;
        let rejected = response
            .rejected_log_events_info
            .map(|info| info.indices(entries.len()))
            .unwrap_or_default();
        if !rejected.is_empty() {
            warn!("CLOUDWATCH | {destination} rejected events at {rejected:?}");
        }
        Ok(PutOutcome {
            next_token: response.next_sequence_token.map(OrderingToken::new),
            rejected,
        })
    }
}

/// Pulls the expected sequence token out of an error message.
///
/// Only used when the error body carries no `expectedSequenceToken` field.
/// A literal `null` means the stream has never been written to.
#[must_use]
pub fn expected_token_from_message(message: &str) -> Option<OrderingToken> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r#"ExpectedSequenceToken:\s*"([^"]*)""#,
            r"sequenceToken is:\s*(\S+)",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    });

    patterns
        .iter()
        .find_map(|pattern| pattern.captures(message))
        .and_then(|captures| captures.get(1))
        .map(|token| token.as_str().trim_end_matches('.'))
        .filter(|token| !token.is_empty() && *token != "null")
        .map(OrderingToken::from)
}

fn api_error(status: reqwest::StatusCode, body: &str) -> SinkError {
    let Ok(error) = serde_json::from_str::<ErrorResponse>(body) else {
        return SinkError::Rejected {
            code: status.to_string(),
            message: body.to_string(),
        };
    };

    let code = error
        .kind
        .as_deref()
        .map(|kind| kind.rsplit('#').next().unwrap_or(kind))
        .unwrap_or_default()
        .to_string();
    let message = error.message.unwrap_or_default();
    let expected = error
        .expected_sequence_token
        .map(OrderingToken::new)
        .or_else(|| expected_token_from_message(&message));

    match code.as_str() {
        INVALID_SEQUENCE_TOKEN => SinkError::StaleToken { expected },
        DATA_ALREADY_ACCEPTED => SinkError::AlreadyAccepted { expected },
        "" => SinkError::Rejected {
            code: status.to_string(),
            message,
        },
        _ => SinkError::Rejected { code, message },
    }
}

fn tolerate_existing(result: Result<Empty, SinkError>) -> Result<(), SinkError> {
    match result {
        Ok(_) => Ok(()),
        Err(SinkError::Rejected { code, .. }) if code == RESOURCE_ALREADY_EXISTS => Ok(()),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct Empty {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsRequest<'a> {
    log_group_name_prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DescribeLogGroupsResponse {
    log_groups: Vec<LogGroup>,
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LogGroup {
    log_group_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name_prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    log_streams: Vec<LogStream>,
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LogStream {
    log_stream_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogGroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutRetentionPolicyRequest<'a> {
    log_group_name: &'a str,
    retention_in_days: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: Vec<InputLogEvent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Serialize)]
struct InputLogEvent<'a> {
    message: &'a str,
    timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PutLogEventsResponse {
    next_sequence_token: Option<String>,
    rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RejectedLogEventsInfo {
    too_new_log_event_start_index: Option<i64>,
    too_old_log_event_end_index: Option<i64>,
    expired_log_event_end_index: Option<i64>,
}

impl RejectedLogEventsInfo {
    // End indices are exclusive, the start index is inclusive.
    fn indices(&self, len: usize) -> Vec<usize> {
        let clamp = |index: Option<i64>| index.map(|i| usize::try_from(i).unwrap_or(0).min(len));
        let old_end = clamp(self.too_old_log_event_end_index)
            .max(clamp(self.expired_log_event_end_index))
            .unwrap_or(0);
        let new_start = clamp(self.too_new_log_event_start_index).unwrap_or(len);
        (0..len).filter(|i| *i < old_end || *i >= new_start).collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ErrorResponse {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
    expected_sequence_token: Option<String>,
}
