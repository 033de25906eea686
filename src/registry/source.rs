use crate::constants::*;
use crate::core::config::SourceConfig;
use crate::{MirrorError, Result};
use bytes::Bytes;
use reqwest::{Client, ClientBuilder, Proxy};
use std::future::Future;
use std::time::Duration;

/// Upstream registry the mirror pulls from
pub trait Source: Send + Sync {
    /// The upstream compact index `versions` file
    fn fetch_version_list(&self) -> impl Future<Output = Result<Bytes>> + Send;

    /// A `.gem` archive, by file name
    fn fetch_package(&self, filename: &str) -> impl Future<Output = Result<Bytes>> + Send;

    /// A `quick/Marshal.4.8/*.gemspec.rz` blob, by file name
    fn fetch_dependency_blob(&self, filename: &str) -> impl Future<Output = Result<Bytes>> + Send;
}

/// HTTP client for a RubyGems-compatible host
pub struct HttpSource {
    client: Client,
    host: String,
    credentials: Option<(String, Option<String>)>,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Self::create_client(config)?;
        let credentials = config
            .username
            .clone()
            .map(|user| (user, config.password.clone()));
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Create HTTP client with pooling, redirects and optional proxy
    fn create_client(config: &SourceConfig) -> Result<Client> {
        let mut builder = ClientBuilder::new()
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("gemmirror/", env!("CARGO_PKG_VERSION")))
            .gzip(true);

        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| MirrorError::Config(format!("Invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| MirrorError::Config(format!("Failed to create HTTP client: {}", e)))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let url = format!("{}/{}", self.host, path);
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(&url);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request.send().await.map_err(|e| MirrorError::Fetch {
            resource: url.clone(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(MirrorError::Fetch {
                resource: url,
                reason: response.status().to_string(),
            });
        }

        Ok(response.bytes().await?)
    }
}

impl Source for HttpSource {
    async fn fetch_version_list(&self) -> Result<Bytes> {
        self.get(VERSIONS).await
    }

    async fn fetch_package(&self, filename: &str) -> Result<Bytes> {
        self.get(&format!("{}/{}", GEMS_DIR, urlencoding::encode(filename)))
            .await
    }

    async fn fetch_dependency_blob(&self, filename: &str) -> Result<Bytes> {
        self.get(&format!("{}/{}", MARSHAL_DIR, urlencoding::encode(filename)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_config(host: &str) -> SourceConfig {
        SourceConfig {
            name: "test".to_string(),
            host: host.to_string(),
            proxy: None,
            username: None,
            password: None,
            timeout_secs: 5,
            gems: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fetches_package_and_blob() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gems/rack-1.0.0.gem"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"gem-bytes".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/quick/Marshal.4.8/rack-1.0.0.gemspec.rz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"blob".to_vec()))
            .mount(&server)
            .await;

        let source = HttpSource::new(&source_config(&format!("{}/", server.uri()))).unwrap();
        assert_eq!(source.fetch_package("rack-1.0.0.gem").await.unwrap().as_ref(), b"gem-bytes");
        assert_eq!(
            source.fetch_dependency_blob("rack-1.0.0.gemspec.rz").await.unwrap().as_ref(),
            b"blob"
        );
    }

    #[tokio::test]
    async fn test_non_success_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gems/missing-1.0.0.gem"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpSource::new(&source_config(&server.uri())).unwrap();
        let err = source.fetch_package("missing-1.0.0.gem").await.unwrap_err();
        assert!(matches!(err, MirrorError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_follows_redirects_and_sends_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/versions"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", format!("{}/moved", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string("created_at: x\n---\n"))
            .mount(&server)
            .await;

        let mut config = source_config(&server.uri());
        config.username = Some("mirror".to_string());
        config.password = Some("secret".to_string());
        let source = HttpSource::new(&config).unwrap();
        let body = source.fetch_version_list().await.unwrap();
        assert!(body.starts_with(b"created_at:"));
    }
}
