//! Kubernetes REST client for ReplicaSets.
//!
//! Each call opens a fresh connection to the API server, optionally wraps
//! it in TLS, and performs a single HTTP/1 exchange with hyper. At one
//! call per tube every few seconds, connection reuse isn't worth the
//! bookkeeping.
//!
//! ```text
//! GET  /apis/apps/v1/namespaces/{ns}/replicasets/{name}
//! POST /apis/apps/v1/namespaces/{ns}/replicasets
//! PUT  /apis/apps/v1/namespaces/{ns}/replicasets/{name}
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri, header};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::api::{BoxFuture, ReplicaSetApi};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::resource::ReplicaSet;

/// Where a pod finds its service-account credentials.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const DEFAULT_NAMESPACE: &str = "default";
const USER_AGENT: &str = "tubescale/0.1";

// ── Configuration ─────────────────────────────────────────────────

/// API server location and credentials.
#[derive(Clone)]
pub struct KubeConfig {
    /// Base URL of the API server (`https://host:port` or `http://host:port`).
    pub server: String,
    /// Bearer token, if any.
    pub token: Option<String>,
    /// PEM bundle used to verify the API server certificate.
    pub ca_pem: Option<Vec<u8>>,
    /// Namespace all ReplicaSets live in.
    pub namespace: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for KubeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeConfig")
            .field("server", &self.server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.as_ref().map(Vec::len))
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl KubeConfig {
    /// Configuration for a process running inside a pod.
    ///
    /// Reads the API server address from `KUBERNETES_SERVICE_HOST` /
    /// `KUBERNETES_SERVICE_PORT` and credentials from
    /// [`SERVICE_ACCOUNT_DIR`].
    pub fn in_cluster(timeout: Duration) -> OrchestratorResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            OrchestratorError::Config("KUBERNETES_SERVICE_HOST is not set".to_string())
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").map_err(|_| {
            OrchestratorError::Config("KUBERNETES_SERVICE_PORT is not set".to_string())
        })?;

        // IPv6 service hosts need brackets in a URL.
        let host = if host.contains(':') { format!("[{host}]") } else { host };
        let mut config = Self::from_service_account(Path::new(SERVICE_ACCOUNT_DIR), timeout)?;
        config.server = format!("https://{host}:{port}");
        Ok(config)
    }

    /// Load token, CA bundle and namespace from a service-account
    /// directory. The token and CA are required; the namespace falls back
    /// to `default`. `server` is left empty for the caller to fill in.
    pub fn from_service_account(dir: &Path, timeout: Duration) -> OrchestratorResult<Self> {
        let token = read_trimmed(&dir.join("token"))?;
        let ca_pem = std::fs::read(dir.join("ca.crt")).map_err(|e| {
            OrchestratorError::Config(format!("{}: {e}", dir.join("ca.crt").display()))
        })?;
        let namespace = read_trimmed(&dir.join("namespace"))
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());

        Ok(Self {
            server: String::new(),
            token: Some(token),
            ca_pem: Some(ca_pem),
            namespace,
            timeout,
        })
    }

    /// Unauthenticated configuration for an explicit server URL, e.g. a
    /// local `kubectl proxy`.
    pub fn for_server(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            token: None,
            ca_pem: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout,
        }
    }

    /// Override the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

fn read_trimmed(path: &Path) -> OrchestratorResult<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| OrchestratorError::Config(format!("{}: {e}", path.display())))
}

// ── Endpoint ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    tls: bool,
    host: String,
    port: u16,
}

impl Endpoint {
    fn parse(server: &str) -> OrchestratorResult<Self> {
        let uri: Uri = server.parse().map_err(|e| {
            OrchestratorError::Config(format!("invalid API server URL {server:?}: {e}"))
        })?;

        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => {
                return Err(OrchestratorError::Config(format!(
                    "API server URL {server:?} must start with http:// or https://"
                )));
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| {
                OrchestratorError::Config(format!("API server URL {server:?} has no host"))
            })?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self { tls, host, port })
    }

    /// Value for the `Host` header.
    fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn tls_connector(ca_pem: Option<&[u8]>) -> OrchestratorResult<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    if let Some(pem) = ca_pem {
        for cert in rustls_pemfile::certs(&mut &pem[..]) {
            let cert = cert.map_err(|e| OrchestratorError::Config(format!("CA bundle: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| OrchestratorError::Config(format!("CA bundle: {e}")))?;
        }
    }
    if roots.is_empty() {
        return Err(OrchestratorError::Config(
            "https API server requires a CA bundle".to_string(),
        ));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| OrchestratorError::Config(format!("TLS setup: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

// ── Status mapping ────────────────────────────────────────────────

/// The `Status` object the API server returns on failure.
#[derive(Debug, Default, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

fn error_from_response(status: StatusCode, body: &[u8]) -> OrchestratorError {
    let parsed: ApiStatus = serde_json::from_slice(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        String::from_utf8_lossy(body).trim().to_string()
    } else {
        parsed.message
    };

    match status {
        StatusCode::NOT_FOUND => OrchestratorError::NotFound(message),
        StatusCode::CONFLICT if parsed.reason == "AlreadyExists" => {
            OrchestratorError::AlreadyExists(message)
        }
        StatusCode::CONFLICT => OrchestratorError::Conflict(message),
        _ => OrchestratorError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

// ── Client ────────────────────────────────────────────────────────

async fn roundtrip<IO>(io: IO, req: Request<Full<Bytes>>) -> OrchestratorResult<(StatusCode, Bytes)>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let transport = |e: hyper::Error| OrchestratorError::Transport(e.to_string());

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(transport)?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "api server connection closed with error");
        }
    });

    let resp = sender.send_request(req).await.map_err(transport)?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(transport)?
        .to_bytes();
    Ok((status, body))
}

/// ReplicaSet client for one namespace of one cluster.
pub struct KubeClient {
    endpoint: Endpoint,
    token: Option<String>,
    namespace: String,
    timeout: Duration,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl KubeClient {
    /// Build a client. Fails on a malformed URL or unusable CA bundle.
    pub fn new(config: KubeConfig) -> OrchestratorResult<Self> {
        let endpoint = Endpoint::parse(&config.server)?;
        let tls = if endpoint.tls {
            Some(tls_connector(config.ca_pem.as_deref())?)
        } else {
            None
        };

        info!(
            server = %config.server,
            namespace = %config.namespace,
            tls = endpoint.tls,
            "kubernetes client initialized"
        );

        Ok(Self {
            endpoint,
            token: config.token,
            namespace: config.namespace,
            timeout: config.timeout,
            tls,
        })
    }

    /// Namespace this client writes to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn collection_path(&self) -> String {
        format!("/apis/apps/v1/namespaces/{}/replicasets", self.namespace)
    }

    fn item_path(&self, name: &str) -> String {
        format!("{}/{name}", self.collection_path())
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> OrchestratorResult<Request<Full<Bytes>>> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, self.endpoint.authority())
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }

        builder
            .body(Full::new(body.map(Bytes::from).unwrap_or_default()))
            .map_err(|e| OrchestratorError::Transport(e.to_string()))
    }

    async fn send(&self, req: Request<Full<Bytes>>) -> OrchestratorResult<(StatusCode, Bytes)> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            OrchestratorError::Transport(format!("connect {}: {e}", self.endpoint.authority()))
        })?;

        match &self.tls {
            Some(connector) => {
                let server_name =
                    rustls::pki_types::ServerName::try_from(self.endpoint.host.clone())
                        .map_err(|e| OrchestratorError::Config(format!("server name: {e}")))?;
                let stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| OrchestratorError::Transport(format!("tls handshake: {e}")))?;
                roundtrip(stream, req).await
            }
            None => roundtrip(stream, req).await,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> OrchestratorResult<T> {
        let req = self.build_request(method.clone(), path, body)?;
        let (status, bytes) = tokio::time::timeout(self.timeout, self.send(req))
            .await
            .map_err(|_| OrchestratorError::Timeout(self.timeout))??;

        debug!(%method, %path, status = status.as_u16(), "api server call");

        if !status.is_success() {
            return Err(error_from_response(status, &bytes));
        }
        serde_json::from_slice(&bytes).map_err(|e| OrchestratorError::Decode(e.to_string()))
    }
}

fn encode(rs: &ReplicaSet) -> OrchestratorResult<Vec<u8>> {
    serde_json::to_vec(rs).map_err(|e| OrchestratorError::Decode(format!("encode: {e}")))
}

fn required_name(rs: &ReplicaSet) -> OrchestratorResult<&str> {
    rs.name()
        .ok_or_else(|| OrchestratorError::InvalidName(String::new()))
}

impl ReplicaSetApi for KubeClient {
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>> {
        Box::pin(async move { self.call(Method::GET, &self.item_path(name), None).await })
    }

    fn create<'a>(&'a self, rs: &'a ReplicaSet) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>> {
        Box::pin(async move {
            required_name(rs)?;
            self.call(Method::POST, &self.collection_path(), Some(encode(rs)?))
                .await
        })
    }

    fn update<'a>(&'a self, rs: &'a ReplicaSet) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>> {
        Box::pin(async move {
            let name = required_name(rs)?;
            self.call(Method::PUT, &self.item_path(name), Some(encode(rs)?))
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use axum::extract::{Path as UrlPath, State};
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};

    // ── Endpoint / status mapping ────────────────────────────────

    #[test]
    fn parses_endpoints() {
        assert_eq!(
            Endpoint::parse("https://10.96.0.1:443").unwrap(),
            Endpoint {
                tls: true,
                host: "10.96.0.1".into(),
                port: 443
            }
        );
        assert_eq!(
            Endpoint::parse("http://127.0.0.1:8001").unwrap(),
            Endpoint {
                tls: false,
                host: "127.0.0.1".into(),
                port: 8001
            }
        );
        assert_eq!(
            Endpoint::parse("https://kubernetes.default.svc").unwrap().port,
            443
        );
        assert_eq!(
            Endpoint::parse("https://[fd00::1]:6443").unwrap().authority(),
            "[fd00::1]:6443"
        );
        assert!(Endpoint::parse("ftp://example").is_err());
        assert!(Endpoint::parse("not a url").is_err());
    }

    #[test]
    fn maps_api_statuses() {
        let conflict =
            br#"{"kind":"Status","reason":"Conflict","message":"the object has been modified"}"#;
        let exists = br#"{"kind":"Status","reason":"AlreadyExists","message":"already exists"}"#;
        let forbidden = br#"{"kind":"Status","reason":"Forbidden","message":"cannot update"}"#;

        assert!(matches!(
            error_from_response(StatusCode::CONFLICT, conflict),
            OrchestratorError::Conflict(m) if m.contains("modified")
        ));
        assert!(matches!(
            error_from_response(StatusCode::CONFLICT, exists),
            OrchestratorError::AlreadyExists(_)
        ));
        assert!(matches!(
            error_from_response(StatusCode::NOT_FOUND, b"{}"),
            OrchestratorError::NotFound(_)
        ));
        assert!(matches!(
            error_from_response(StatusCode::FORBIDDEN, forbidden),
            OrchestratorError::Api { status: 403, message } if message == "cannot update"
        ));
        assert!(matches!(
            error_from_response(StatusCode::BAD_GATEWAY, b"upstream down\n"),
            OrchestratorError::Api { status: 502, message } if message == "upstream down"
        ));
    }

    #[test]
    fn https_without_ca_is_rejected() {
        let config = KubeConfig::for_server("https://10.96.0.1:443", Duration::from_secs(1));
        assert!(matches!(
            KubeClient::new(config),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[test]
    fn loads_service_account_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), "s3cr3t\n").unwrap();
        std::fs::write(dir.path().join("ca.crt"), "-----BEGIN CERTIFICATE-----\n").unwrap();
        std::fs::write(dir.path().join("namespace"), "workers").unwrap();

        let config = KubeConfig::from_service_account(dir.path(), Duration::from_secs(1)).unwrap();
        assert_eq!(config.token.as_deref(), Some("s3cr3t"));
        assert_eq!(config.namespace, "workers");
        assert!(!format!("{config:?}").contains("s3cr3t"));
    }

    #[test]
    fn service_account_without_token_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            KubeConfig::from_service_account(dir.path(), Duration::from_secs(1)),
            Err(OrchestratorError::Config(_))
        ));
    }

    // ── Round trips against a fake API server ───────────────────

    #[derive(Clone, Default)]
    struct FakeApi {
        objects: Arc<Mutex<HashMap<String, Value>>>,
        version: Arc<Mutex<u64>>,
        auth: Arc<Mutex<Vec<String>>>,
    }

    impl FakeApi {
        fn next_version(&self) -> String {
            let mut v = self.version.lock().unwrap();
            *v += 1;
            v.to_string()
        }
    }

    fn status(code: StatusCode, reason: &str, message: &str) -> Response {
        let body = json!({"kind": "Status", "reason": reason, "message": message});
        (code, Json(body)).into_response()
    }

    async fn get_rs(
        State(api): State<FakeApi>,
        UrlPath((ns, name)): UrlPath<(String, String)>,
        headers: HeaderMap,
    ) -> Response {
        if let Some(auth) = headers.get("authorization") {
            api.auth.lock().unwrap().push(auth.to_str().unwrap().to_string());
        }
        assert_eq!(ns, "workers");
        match api.objects.lock().unwrap().get(&name) {
            Some(obj) => Json(obj.clone()).into_response(),
            None => status(StatusCode::NOT_FOUND, "NotFound", "replicasets not found"),
        }
    }

    async fn create_rs(
        State(api): State<FakeApi>,
        UrlPath(_ns): UrlPath<String>,
        Json(mut body): Json<Value>,
    ) -> Response {
        let name = body["metadata"]["name"].as_str().unwrap().to_string();
        if api.objects.lock().unwrap().contains_key(&name) {
            return status(StatusCode::CONFLICT, "AlreadyExists", "already exists");
        }
        body["metadata"]["resourceVersion"] = Value::from(api.next_version());
        api.objects.lock().unwrap().insert(name, body.clone());
        (StatusCode::CREATED, Json(body)).into_response()
    }

    async fn update_rs(
        State(api): State<FakeApi>,
        UrlPath((_ns, name)): UrlPath<(String, String)>,
        Json(mut body): Json<Value>,
    ) -> Response {
        let current = api.objects.lock().unwrap().get(&name).cloned();
        let Some(current) = current else {
            return status(StatusCode::NOT_FOUND, "NotFound", "not found");
        };
        if current["metadata"]["resourceVersion"] != body["metadata"]["resourceVersion"] {
            return status(StatusCode::CONFLICT, "Conflict", "the object has been modified");
        }
        body["metadata"]["resourceVersion"] = Value::from(api.next_version());
        api.objects.lock().unwrap().insert(name, body.clone());
        Json(body).into_response()
    }

    async fn serve(api: FakeApi) -> String {
        let router = Router::new()
            .route(
                "/apis/apps/v1/namespaces/{ns}/replicasets",
                post(create_rs),
            )
            .route(
                "/apis/apps/v1/namespaces/{ns}/replicasets/{name}",
                get(get_rs).put(update_rs),
            )
            .with_state(api);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(server: String) -> KubeClient {
        let mut config =
            KubeConfig::for_server(server, Duration::from_secs(5)).with_namespace("workers");
        config.token = Some("t0ken".to_string());
        KubeClient::new(config).unwrap()
    }

    fn replica_set(name: &str, replicas: u32) -> ReplicaSet {
        let mut rs: ReplicaSet = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {"name": name, "labels": {"app": "consumer"}},
            "spec": {"template": {"spec": {"containers": [
                {"name": "consumer", "env": [{"name": "QUEUE", "value": "emails"}]}
            ]}}}
        }))
        .unwrap();
        rs.set_replicas(replicas);
        rs
    }

    #[tokio::test]
    async fn get_create_update_round_trip() {
        let api = FakeApi::default();
        let kube = client(serve(api.clone()).await);

        let err = kube.get("consumer-emails").await.unwrap_err();
        assert!(err.is_not_found());

        let created = kube.create(&replica_set("consumer-emails", 3)).await.unwrap();
        assert_eq!(created.resource_version(), Some("1"));
        assert_eq!(created.metadata.extra["labels"]["app"], "consumer");

        let mut fetched = kube.get("consumer-emails").await.unwrap();
        assert_eq!(fetched.replicas(), Some(3));
        assert_eq!(fetched.tube_binding(), Some("emails"));

        fetched.set_replicas(0);
        let updated = kube.update(&fetched).await.unwrap();
        assert_eq!(updated.replicas(), Some(0));
        assert_eq!(updated.resource_version(), Some("2"));

        assert!(api.auth.lock().unwrap().iter().all(|a| a == "Bearer t0ken"));
    }

    #[tokio::test]
    async fn stale_update_is_conflict() {
        let api = FakeApi::default();
        let kube = client(serve(api.clone()).await);

        kube.create(&replica_set("consumer-a", 1)).await.unwrap();
        let mut stale = kube.get("consumer-a").await.unwrap();

        let mut fresh = stale.clone();
        fresh.set_replicas(5);
        kube.update(&fresh).await.unwrap();

        stale.set_replicas(2);
        let err = kube.update(&stale).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let api = FakeApi::default();
        let kube = client(serve(api).await);

        kube.create(&replica_set("consumer-a", 1)).await.unwrap();
        let err = kube.create(&replica_set("consumer-a", 1)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyExists(_)));
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let kube = client(format!("http://{addr}"));
        let err = kube.get("consumer-a").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Transport(_)));
    }
}
