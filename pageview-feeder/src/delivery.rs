use std::time;

use http::StatusCode;
use reqwest::header;
use tracing::debug;

use crate::error::{ConfigError, DeliveryError};
use crate::event::PageviewEvent;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Client for the events API of the collector.
#[derive(Clone, Debug)]
pub struct Collector {
    /// The client used for HTTP requests.
    client: reqwest::Client,
    /// Where events are POSTed to.
    endpoint: reqwest::Url,
}

impl Collector {
    pub fn new(
        endpoint: reqwest::Url,
        request_timeout: time::Duration,
    ) -> Result<Self, ConfigError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self { client, endpoint })
    }

    /// Send one event to the collector. Only a `202 Accepted` counts as delivered;
    /// nothing is retried.
    pub async fn deliver(&self, event: &PageviewEvent) -> Result<(), DeliveryError> {
        let payload = serde_json::to_vec(event)?;

        // The user agent of the visitor is reported as is. An agent that is not a
        // valid header value is sent as empty.
        let user_agent = header::HeaderValue::from_str(&event.user_agent)
            .unwrap_or_else(|_| header::HeaderValue::from_static(""));

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(header::USER_AGENT, user_agent)
            .header(X_FORWARDED_FOR, event.remote_ip.to_string())
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            return Err(DeliveryError::UnexpectedStatus(status));
        }

        debug!(
            endpoint = %self.endpoint,
            domain = %event.domain,
            url = %event.url,
            status_code = %event.status_code,
            remote_ip = %event.remote_ip,
            "sent event"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn event() -> PageviewEvent {
        PageviewEvent::new(
            "Mozilla/5.0 (X11; Linux x86_64)".to_owned(),
            "203.0.113.5".parse().unwrap(),
            "example.com".to_owned(),
            "/index.html".to_owned(),
            200,
        )
    }

    fn collector(server: &MockServer) -> Collector {
        Collector::new(
            server.url("/api/event").parse().unwrap(),
            time::Duration::from_secs(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_deliver() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/event")
                    .header("content-type", "application/json")
                    .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64)")
                    .header("x-forwarded-for", "203.0.113.5")
                    .json_body(json!({
                        "domain": "example.com",
                        "name": "pageview",
                        "url": "/index.html",
                        "plausible-event-statuscode": "200",
                    }));
                then.status(202);
            })
            .await;

        collector(&server)
            .deliver(&event())
            .await
            .expect("delivery failed");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deliver_only_accepts_202() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/event");
                then.status(200);
            })
            .await;

        let result = collector(&server).deliver(&event()).await;

        assert!(matches!(
            result,
            Err(DeliveryError::UnexpectedStatus(StatusCode::OK))
        ));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_deliver_does_not_retry() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/event");
                then.status(503);
            })
            .await;

        let result = collector(&server).deliver(&event()).await;

        assert!(matches!(
            result,
            Err(DeliveryError::UnexpectedStatus(StatusCode::SERVICE_UNAVAILABLE))
        ));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_deliver_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/event");
                then.status(202).delay(time::Duration::from_millis(500));
            })
            .await;

        let collector = Collector::new(
            server.url("/api/event").parse().unwrap(),
            time::Duration::from_millis(50),
        )
        .unwrap();

        let error = collector.deliver(&event()).await.unwrap_err();
        assert_eq!(error.outcome(), "timeout");
    }
}
