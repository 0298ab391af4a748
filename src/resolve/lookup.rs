//! Redirect lookup: asks the lookup service for a one-time redirect URL.

use crate::config::{SessionConfig, StreamingType};
use crate::error::{Result, SimError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lookup service success code carried in the response body
pub const LOOKUP_SUCCESS: i64 = 200;

/// Request body for `POST /command/demandOtu`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    pub service_code: String,
    pub client_ip: String,
    pub protocol_type: String,
    pub content_type: String,
    pub content: String,
    pub request_bitrate: String,
    pub streaming_type: String,
    pub path: String,
}

impl LookupRequest {
    pub fn for_session(session: &SessionConfig, streaming_type: StreamingType) -> Self {
        let (path, content) = session.content_parts();
        Self {
            service_code: session.service_code.clone(),
            client_ip: session.source_addr.to_string(),
            protocol_type: session.protocol.lookup_tag().to_string(),
            content_type: session.content_type.clone(),
            content: content.to_string(),
            request_bitrate: session.bitrate_class.clone(),
            streaming_type: streaming_type.as_str().to_string(),
            path: path.to_string(),
        }
    }
}

/// Response body of the lookup service
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LookupResponse {
    pub result_code: i64,
    pub one_time_url: Vec<String>,
    pub error_string: String,
}

/// Issue the lookup request and return the first one-time URL.
///
/// # Errors
/// [`SimError::Lookup`] on transport failure, a non-200 HTTP status, an
/// undecodable body, a non-success `resultCode` or an empty URL list.
pub async fn demand_one_time_url(
    client: &Client,
    server_addr: &str,
    request: &LookupRequest,
) -> Result<String> {
    let endpoint = format!("http://{server_addr}/command/demandOtu");
    debug!("Lookup request to {}: {:?}", endpoint, request);

    let response = client
        .post(&endpoint)
        .json(request)
        .send()
        .await
        .map_err(|e| SimError::Lookup(e.to_string()))?;

    if response.status() != StatusCode::OK {
        return Err(SimError::Lookup(format!(
            "Status Code = {}",
            response.status().as_u16()
        )));
    }

    let body: LookupResponse = response
        .json()
        .await
        .map_err(|e| SimError::Lookup(format!("undecodable response: {e}")))?;

    if body.result_code != LOOKUP_SUCCESS {
        return Err(SimError::Lookup(format!(
            "result code {}: {}",
            body.result_code, body.error_string
        )));
    }

    body.one_time_url
        .into_iter()
        .next()
        .ok_or_else(|| SimError::Lookup("response carried no oneTimeUrl".to_string()))
}
