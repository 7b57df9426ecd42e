//! HTTP client for the scheduler endpoint of the leading master.

use std::time::Duration;

use berth_proto::{Call, FrameworkInfo, SCHEDULER_API_PATH, STREAM_ID_HEADER};
use reqwest::StatusCode;
use tracing::{debug, error};

use super::{ConnectorError, SharedSession};

/// Upper bound on one call POST. Subscribe is not bounded.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Scheduler API client. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerClient {
    client: reqwest::Client,
    session: SharedSession,
}

impl SchedulerClient {
    pub fn new(session: SharedSession) -> Result<Self, ConnectorError> {
        // No overall timeout: the subscribe response stays open for the
        // lifetime of the session.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, session })
    }

    fn endpoint(&self) -> Result<String, ConnectorError> {
        let session = self.session.load();
        let leader = session.leader.as_ref().ok_or(ConnectorError::NotConnected)?;
        Ok(format!("http://{leader}{SCHEDULER_API_PATH}"))
    }

    /// Open the subscription. Returns the stream id and the streaming
    /// response whose body carries the events.
    pub async fn subscribe(
        &self,
        framework_info: FrameworkInfo,
    ) -> Result<(String, reqwest::Response), ConnectorError> {
        let url = self.endpoint()?;
        let call = Call::subscribe(framework_info);
        debug!(url = %url, "Subscribing");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&call)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Subscribe rejected");
            return Err(ConnectorError::SubscribeRejected {
                status: status.as_u16(),
                body,
            });
        }

        let stream_id = response
            .headers()
            .get(STREAM_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(ConnectorError::MissingStreamId)?;

        Ok((stream_id, response))
    }

    /// Send one call on the current subscription. Anything but
    /// `202 Accepted` is an error.
    pub async fn send(&self, call: Call) -> Result<(), ConnectorError> {
        let url = self.endpoint()?;
        let (stream_id, framework_id) = {
            let session = self.session.load();
            (
                session.stream_id.clone().unwrap_or_default(),
                session.framework_id.clone(),
            )
        };

        let call = call.with_framework_id(framework_id.as_ref());
        let call_type = call.call_type;
        debug!(call_type = ?call_type, "Sending call");

        let response = self
            .client
            .post(&url)
            .header(STREAM_ID_HEADER, stream_id)
            .timeout(CALL_TIMEOUT)
            .json(&call)
            .send()
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(call_type = ?call_type, status = %status, body = %body, "Call rejected");
            return Err(ConnectorError::CallRejected {
                call_type,
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
