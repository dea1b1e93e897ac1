use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use http::{Request, Response};
use pin_project::pin_project;
use tower::{Layer, Service};

use crate::feeder::PageviewFeeder;
use crate::filter::decode_path;
use crate::identity::{request_host, RequestInfo};

/// Tower layer that reports eligible requests to the collector as pageviews.
///
/// Requests always go on to the inner service unchanged, and responses come back
/// unchanged, including any pending protocol upgrade.
#[derive(Clone)]
pub struct PageviewLayer {
    feeder: PageviewFeeder,
}

impl PageviewLayer {
    pub fn new(feeder: PageviewFeeder) -> Self {
        Self { feeder }
    }
}

impl<S> Layer<S> for PageviewLayer {
    type Service = PageviewService<S>;

    fn layer(&self, service: S) -> Self::Service {
        PageviewService {
            inner: service,
            feeder: self.feeder.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PageviewService<S> {
    inner: S,
    feeder: PageviewFeeder,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for PageviewService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = PageviewFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Only requests that could be reported carry what is needed to report them.
        let intercept = self
            .feeder
            .should_intercept(request_host(&request), &decode_path(request.uri().path()));
        let observer = intercept.then(|| {
            let ip_header = self.feeder.settings().remote_ip_from_header.as_ref();
            (
                self.feeder.clone(),
                RequestInfo::from_request(&request, ip_header),
            )
        });

        PageviewFuture {
            inner: self.inner.call(request),
            observer,
        }
    }
}

/// Future wrapper that reports the request once the response head is available.
#[pin_project]
pub struct PageviewFuture<F> {
    #[pin]
    inner: F,
    observer: Option<(PageviewFeeder, RequestInfo)>,
}

impl<F, ResBody, E> Future for PageviewFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));

        if let (Ok(response), Some((feeder, request))) = (&result, this.observer.take()) {
            feeder.observe(&request, response.status());
        }

        Poll::Ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::net::SocketAddr;

    use axum::extract::ConnectInfo;
    use http::{header, StatusCode};
    use tokio_util::sync::CancellationToken;
    use tower::{service_fn, ServiceExt};

    use super::*;
    use crate::config::FeederConfig;
    use crate::queue::{event_queue, EventReceiver};

    fn feeder() -> (PageviewFeeder, EventReceiver) {
        let settings = FeederConfig::new("http://localhost/api/event", &["a.com"])
            .normalize()
            .unwrap();
        let (sender, receiver) = event_queue(settings.queue_size);
        let feeder = PageviewFeeder::from_parts(
            "test",
            settings,
            sender,
            CancellationToken::new(),
            None,
        );
        (feeder, receiver)
    }

    fn request(host: &str, uri: &str) -> Request<String> {
        let mut request = Request::builder()
            .uri(uri)
            .header(header::HOST, host)
            .header(header::USER_AGENT, "Mozilla/5.0")
            .body(String::new())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("192.0.2.1:4000".parse::<SocketAddr>().unwrap()));
        request
    }

    async fn respond_with(
        layer: PageviewLayer,
        request: Request<String>,
        status: StatusCode,
    ) -> Response<String> {
        let service = layer.layer(service_fn(move |_: Request<String>| async move {
            Ok::<_, Infallible>(
                Response::builder()
                    .status(status)
                    .header("x-upstream", "yes")
                    .body("hello".to_owned())
                    .unwrap(),
            )
        }));

        service.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_reports_pageview() {
        let (feeder, receiver) = feeder();
        let layer = PageviewLayer::new(feeder);

        let response = respond_with(layer, request("a.com", "/index.html"), StatusCode::OK).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-upstream"], "yes");
        assert_eq!(response.body(), "hello");

        let event = receiver.lock().await.try_recv().unwrap();
        assert_eq!(event.name, "pageview");
        assert_eq!(event.domain, "a.com");
        assert_eq!(event.url, "/index.html");
        assert_eq!(event.status_code, "200");
        assert_eq!(event.user_agent, "Mozilla/5.0");
        assert_eq!(event.remote_ip.to_string(), "192.0.2.1");
    }

    #[tokio::test]
    async fn test_does_not_report_static_assets() {
        let (feeder, receiver) = feeder();
        let layer = PageviewLayer::new(feeder);

        let response = respond_with(layer, request("a.com", "/logo.png"), StatusCode::OK).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(receiver.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_extension_is_read_from_decoded_path() {
        let (feeder, receiver) = feeder();
        let layer = PageviewLayer::new(feeder);

        respond_with(layer.clone(), request("a.com", "/logo%2Ejpg"), StatusCode::OK).await;
        assert!(receiver.lock().await.try_recv().is_err());

        respond_with(layer, request("a.com", "/page%2Ehtml?q=1"), StatusCode::OK).await;
        let event = receiver.lock().await.try_recv().unwrap();
        assert_eq!(event.url, "/page%2Ehtml?q=1");
    }

    #[tokio::test]
    async fn test_does_not_report_errors_or_unlisted_hosts() {
        let (feeder, receiver) = feeder();
        let layer = PageviewLayer::new(feeder);

        let response =
            respond_with(layer.clone(), request("a.com", "/missing"), StatusCode::NOT_FOUND).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        respond_with(layer, request("b.com", "/"), StatusCode::OK).await;

        assert!(receiver.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inner_error_is_not_reported() {
        let (feeder, receiver) = feeder();
        let service = PageviewLayer::new(feeder).layer(service_fn(|_: Request<String>| async {
            Err::<Response<String>, _>("upstream failed")
        }));

        let result = service.oneshot(request("a.com", "/")).await;

        assert_eq!(result.unwrap_err(), "upstream failed");
        assert!(receiver.lock().await.try_recv().is_err());
    }
}
