use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{ACCEPT, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED},
    Client, Request, RequestBuilder, Response, StatusCode,
};
use thiserror::Error;
use tracing::{debug, field, info, warn};
use url::Url;

use bulb_common::{
    read_query, ActivationOutcome, AliasValues, Credential, DeviceIdentity, LongPollOutcome,
    ReadOutcome, Rejection, Watermark, WriteOutcome,
};

const ACTIVATE_PATH: &str = "/provision/activate";
const ALIAS_PATH: &str = "/onep:v1/stack/alias";
const CREDENTIAL_HEADER: &str = "X-Exosite-CIK";
const REQUEST_TIMEOUT_HEADER: &str = "Request-Timeout";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("invalid platform endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Remote device-management API. Implementations never fail: every
/// transport or status problem is folded into the returned outcome, and
/// retries are left to the caller.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn activate(&self, identity: &DeviceIdentity) -> ActivationOutcome;

    async fn write(&self, credential: &Credential, values: &AliasValues) -> WriteOutcome;

    async fn read(&self, credential: &Credential, targets: &[&str]) -> ReadOutcome;

    /// Blocks server-side for up to `timeout` waiting for `target` to change
    /// past `watermark`.
    async fn long_poll_wait(
        &self,
        credential: &Credential,
        target: &str,
        watermark: Option<Watermark>,
        timeout: Duration,
    ) -> LongPollOutcome;
}

#[derive(Debug, Clone)]
pub struct HttpPlatform {
    client: Client,
    activate_url: Url,
    alias_url: Url,
    request_timeout: Duration,
    show_requests: bool,
}

impl HttpPlatform {
    pub fn new(
        base_url: Url,
        request_timeout: Duration,
        show_requests: bool,
    ) -> Result<Self, PlatformError> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            activate_url: base_url.join(ACTIVATE_PATH)?,
            alias_url: base_url.join(ALIAS_PATH)?,
            request_timeout,
            show_requests,
        })
    }

    fn alias_query_url(&self, targets: &[&str]) -> Url {
        let mut url = self.alias_url.clone();
        url.set_query(Some(&read_query(targets)));
        url
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, String> {
        let request = request.build().map_err(|err| {
            warn!(operation, "failed to build request: {err}");
            err.to_string()
        })?;
        self.log_request(operation, &request);

        match self.client.execute(request).await {
            Ok(response) => {
                self.log_response(operation, &response);
                Ok(response)
            }
            Err(err) => {
                warn!(operation, "request failed: {err}");
                Err(err.to_string())
            }
        }
    }

    fn log_request(&self, operation: &'static str, request: &Request) {
        if self.show_requests {
            info!(operation, "request: {}", describe_request(request));
        } else {
            debug!(operation, "request: {}", describe_request(request));
        }
    }

    fn log_response(&self, operation: &'static str, response: &Response) {
        let status = field::display(response.status());
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok());
        if self.show_requests {
            info!(operation, status, last_modified, "platform response");
        } else {
            debug!(operation, status, last_modified, "platform response");
        }
    }
}

/// Request line plus the conditional headers. The credential header is
/// never included.
fn describe_request(request: &Request) -> String {
    let mut line = format!("{} {}", request.method(), request.url());
    for name in [IF_MODIFIED_SINCE.as_str(), REQUEST_TIMEOUT_HEADER] {
        if let Some(value) = request.headers().get(name).and_then(|v| v.to_str().ok()) {
            line.push_str(&format!(" {name}: {value}"));
        }
    }
    line
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn activate(&self, identity: &DeviceIdentity) -> ActivationOutcome {
        let body = AliasValues::new()
            .with("vendor", identity.product_id.as_str())
            .with("model", identity.product_id.as_str())
            .with("sn", identity.device_id.as_str())
            .encode();

        let request = self
            .client
            .post(self.activate_url.clone())
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .timeout(self.request_timeout)
            .body(body);

        let response = match self.send("activate", request).await {
            Ok(response) => response,
            Err(reason) => return ActivationOutcome::Unreachable(reason),
        };

        match response.status() {
            StatusCode::OK => match response.text().await {
                Ok(text) if !text.trim().is_empty() => {
                    ActivationOutcome::Issued(Credential::new(text.trim()))
                }
                Ok(_) => ActivationOutcome::TransientFailure(StatusCode::OK.as_u16()),
                Err(err) => ActivationOutcome::Unreachable(err.to_string()),
            },
            StatusCode::CONFLICT => ActivationOutcome::AlreadyActivated,
            StatusCode::NOT_FOUND => ActivationOutcome::NotFound,
            status => ActivationOutcome::TransientFailure(status.as_u16()),
        }
    }

    async fn write(&self, credential: &Credential, values: &AliasValues) -> WriteOutcome {
        let request = self
            .client
            .post(self.alias_url.clone())
            .header(CREDENTIAL_HEADER, credential.as_str())
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .timeout(self.request_timeout)
            .body(values.encode());

        match self.send("write", request).await {
            Ok(response) if response.status().is_success() => WriteOutcome::Written,
            Ok(response) => {
                WriteOutcome::Rejected(Rejection::from_status(response.status().as_u16()))
            }
            Err(reason) => WriteOutcome::Rejected(Rejection::Unreachable(reason)),
        }
    }

    async fn read(&self, credential: &Credential, targets: &[&str]) -> ReadOutcome {
        let request = self
            .client
            .get(self.alias_query_url(targets))
            .header(CREDENTIAL_HEADER, credential.as_str())
            .header(ACCEPT, FORM_CONTENT_TYPE)
            .timeout(self.request_timeout);

        let response = match self.send("read", request).await {
            Ok(response) => response,
            Err(reason) => return ReadOutcome::Rejected(Rejection::Unreachable(reason)),
        };

        let status = response.status();
        if !status.is_success() {
            return ReadOutcome::Rejected(Rejection::from_status(status.as_u16()));
        }

        match response.text().await {
            Ok(body) => ReadOutcome::Value(AliasValues::parse(&body)),
            Err(err) => ReadOutcome::Rejected(Rejection::Unreachable(err.to_string())),
        }
    }

    async fn long_poll_wait(
        &self,
        credential: &Credential,
        target: &str,
        watermark: Option<Watermark>,
        timeout: Duration,
    ) -> LongPollOutcome {
        let mut request = self
            .client
            .get(self.alias_query_url(&[target]))
            .header(CREDENTIAL_HEADER, credential.as_str())
            .header(ACCEPT, FORM_CONTENT_TYPE)
            .header(REQUEST_TIMEOUT_HEADER, timeout.as_millis().to_string())
            .timeout(timeout + self.request_timeout);

        if let Some(watermark) = watermark {
            request = request.header(IF_MODIFIED_SINCE, watermark.to_http_date());
        }

        let response = match self.send("long_poll", request).await {
            Ok(response) => response,
            Err(reason) => return LongPollOutcome::Rejected(Rejection::Unreachable(reason)),
        };

        match response.status() {
            StatusCode::OK => {
                let watermark = next_watermark(&response);
                match response.text().await {
                    Ok(body) => LongPollOutcome::Changed {
                        values: AliasValues::parse(&body),
                        watermark,
                    },
                    Err(err) => LongPollOutcome::Rejected(Rejection::Unreachable(err.to_string())),
                }
            }
            StatusCode::NOT_MODIFIED => LongPollOutcome::Unchanged,
            status => LongPollOutcome::Rejected(Rejection::from_status(status.as_u16())),
        }
    }
}

/// Watermark for the next long-poll: the reported `Last-Modified` nudged
/// forward so the same update is not delivered twice.
fn next_watermark(response: &Response) -> Option<Watermark> {
    let raw = response.headers().get(LAST_MODIFIED)?.to_str().ok()?;
    match raw.parse::<Watermark>() {
        Ok(reported) => Some(reported.next()),
        Err(err) => {
            warn!("ignoring last-modified header: {err}");
            None
        }
    }
}
