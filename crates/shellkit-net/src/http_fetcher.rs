//! reqwest-backed [`Fetcher`].

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{Fetcher, NetError, Request, Response};

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Transport timeout for a whole exchange.
    pub timeout: Duration,
    /// Maximum redirects followed before giving up.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("shellkit/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9,fr;q=0.8".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetches over HTTP(S) with a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    /// The configuration this fetcher was built with.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    async fn execute(
        client: Client,
        accept_language: String,
        timeout: Duration,
        request: Request,
    ) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut builder = client.request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if !request.headers.contains_key(http::header::ACCEPT_LANGUAGE) {
            builder = builder.header(http::header::ACCEPT_LANGUAGE, accept_language);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| map_error(e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(|e| map_error(e, timeout))?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response::new(url, status, headers, body))
    }
}

fn map_error(error: reqwest::Error, timeout: Duration) -> NetError {
    if error.is_timeout() {
        NetError::Timeout(timeout)
    } else {
        NetError::HttpError(error)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, NetError>> {
        Self::execute(
            self.client.clone(),
            self.config.accept_language.clone(),
            self.config.timeout,
            request,
        )
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseSource;
    use http::StatusCode;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(LoaderConfig::default()).unwrap()
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("shellkit/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manifest.webmanifest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"name":"We Luxembourg"}"#, "application/manifest+json"),
            )
            .mount(&server)
            .await;

        let request = Request::parse_get(&format!("{}/manifest.webmanifest", server.uri())).unwrap();
        let response = fetcher().fetch(request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.text().unwrap(), r#"{"name":"We Luxembourg"}"#);
        assert_eq!(
            response.content_type().map(|m| m.essence_str().to_string()),
            Some("application/manifest+json".to_string())
        );
    }

    #[tokio::test]
    async fn test_http_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.css"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let request = Request::parse_get(&format!("{}/missing.css", server.uri())).unwrap();
        let response = fetcher().fetch(request).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_accept_language_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let request = Request::parse_get(&format!("{}/", server.uri())).unwrap();
        let response = fetcher().fetch(request).await.unwrap();
        assert!(response.ok());

        // Matched on the raw value: a comma-separated list is one header line.
        let received = server.received_requests().await.unwrap();
        let sent = received[0]
            .headers
            .get("accept-language")
            .and_then(|v| v.to_str().ok());
        assert_eq!(sent, Some("en-US,en;q=0.9,fr;q=0.8"));
    }

    #[tokio::test]
    async fn test_caller_accept_language_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let request = Request::parse_get(&format!("{}/", server.uri()))
            .unwrap()
            .header(
                http::header::ACCEPT_LANGUAGE,
                http::HeaderValue::from_static("fr-LU"),
            );
        fetcher().fetch(request).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let sent: Vec<&str> = received[0]
            .headers
            .get_all("accept-language")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(sent, vec!["fr-LU"]);
    }

    #[tokio::test]
    async fn test_post_body_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/.netlify/functions/inquiry"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let url = url::Url::parse(&format!("{}/.netlify/functions/inquiry", server.uri())).unwrap();
        let request = Request::post(url, bytes::Bytes::from_static(b"{\"name\":\"Ana\"}"));
        let response = fetcher().fetch(request).await.unwrap();

        assert_eq!(response.status, StatusCode::CREATED);
        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].body, b"{\"name\":\"Ana\"}".to_vec());
    }

    #[tokio::test]
    async fn test_connection_refused_is_an_error() {
        // Nothing listens on port 1.
        let request = Request::parse_get("http://127.0.0.1:1/").unwrap();
        let result = fetcher().fetch(request).await;
        assert!(result.is_err());
    }
}
