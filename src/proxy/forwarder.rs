//! Upstream transport
//!
//! Three pooled clients per worker: `plain` for http targets, `secure` for
//! https targets verified against the webpki roots, and `mesh` for https
//! targets listed in `proxy.mesh.hosts`. Only the mesh client may skip
//! certificate verification, and only when `proxy.mesh.relaxed_tls` is set.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use actix_web::http::{Method, Version};
use actix_web::{HttpMessage, HttpRequest, HttpResponse, web};
use awc::{Client, Connector};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use super::routes::Route;
use crate::config::{MeshConfig, PoolConfig, ProxyConfig};
use crate::errors::GatewayError;
use crate::middlewares::{Principal, RequestId, X_REQUEST_ID};

/// Headers that describe one hop and are never forwarded
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    HeaderName::from_static("trailers"),
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USER_EMAIL: HeaderName = HeaderName::from_static("x-user-email");
pub const X_USER_ROLE: HeaderName = HeaderName::from_static("x-user-role");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// rustls client settings shared by every worker's clients
#[derive(Clone)]
pub struct UpstreamTls {
    secure: Arc<ClientConfig>,
    mesh: Arc<ClientConfig>,
}

impl UpstreamTls {
    pub fn new(mesh: &MeshConfig) -> Result<Self, rustls::Error> {
        let provider = Arc::new(ring::default_provider());

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut secure = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        secure.alpn_protocols = vec![b"http/1.1".to_vec()];
        let secure = Arc::new(secure);

        let mesh = if mesh.relaxed_tls {
            tracing::warn!(
                hosts = ?mesh.hosts,
                "Certificate verification disabled for mesh upstreams"
            );
            let mut relaxed = ClientConfig::builder_with_provider(provider.clone())
                .with_safe_default_protocol_versions()?
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(MeshCertVerifier { provider }))
                .with_no_client_auth();
            relaxed.alpn_protocols = vec![b"http/1.1".to_vec()];
            Arc::new(relaxed)
        } else {
            secure.clone()
        };

        Ok(Self { secure, mesh })
    }
}

/// Accepts any certificate but still checks handshake signatures
#[derive(Debug)]
struct MeshCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for MeshCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Secure,
    Mesh,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Plain => "plain",
            Transport::Secure => "secure",
            Transport::Mesh => "mesh",
        }
    }
}

/// Per-worker upstream clients
///
/// `awc::Client` is not `Send`, so each worker builds its own inside the app
/// factory; connection pools are shared by every request on that worker.
pub struct Forwarder {
    plain: Client,
    secure: Client,
    mesh: Client,
    mesh_config: MeshConfig,
    request_timeout: Duration,
}

fn client(pool: &PoolConfig, tls: Option<Arc<ClientConfig>>) -> Client {
    let connector = Connector::new()
        .limit(pool.max_connections)
        .conn_keep_alive(Duration::from_secs(pool.keep_alive_secs))
        .timeout(Duration::from_millis(pool.connect_timeout_ms));
    let connector = match tls {
        Some(tls) => connector.rustls_0_23(tls),
        None => connector,
    };

    Client::builder()
        .connector(connector)
        .timeout(Duration::from_millis(pool.request_timeout_ms))
        .disable_redirects()
        .no_default_headers()
        .finish()
}

/// Copy end-to-end headers, dropping hop-by-hop ones and anything the
/// `Connection` header nominates
fn end_to_end(headers: &HeaderMap) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
    let nominated: Vec<String> = headers
        .get_all(header::CONNECTION)
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    headers.iter().filter(move |(name, _)| {
        !HOP_BY_HOP.contains(*name) && !nominated.iter().any(|n| n == name.as_str())
    })
}

impl Forwarder {
    pub fn new(config: &ProxyConfig, tls: &UpstreamTls) -> Self {
        Self {
            plain: client(&config.pool, None),
            secure: client(&config.pool, Some(tls.secure.clone())),
            mesh: client(&config.pool, Some(tls.mesh.clone())),
            mesh_config: config.mesh.clone(),
            request_timeout: Duration::from_millis(config.pool.request_timeout_ms),
        }
    }

    pub fn transport_for(&self, route: &Route) -> Transport {
        if !route.is_secure() {
            Transport::Plain
        } else if self.mesh_config.is_mesh_host(route.upstream_host()) {
            Transport::Mesh
        } else {
            Transport::Secure
        }
    }

    fn client(&self, transport: Transport) -> &Client {
        match transport {
            Transport::Plain => &self.plain,
            Transport::Secure => &self.secure,
            Transport::Mesh => &self.mesh,
        }
    }

    /// Stream `req` to `target` and stream the upstream's answer back
    ///
    /// Status, headers (minus hop-by-hop) and body are relayed unchanged.
    /// Connection failures and timeouts become `UPSTREAM_UNAVAILABLE`.
    pub async fn forward(
        &self,
        req: &HttpRequest,
        payload: web::Payload,
        route: &Route,
        target: &str,
        principal: Option<&Principal>,
    ) -> Result<HttpResponse, GatewayError> {
        let transport = self.transport_for(route);
        let timeout = route
            .config()
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.request_timeout);

        let mut upstream = self
            .client(transport)
            .request(req.method().clone(), target)
            .no_decompress()
            .timeout(timeout);

        let headers = upstream.headers_mut();
        for (name, value) in end_to_end(req.headers()) {
            if *name == header::HOST
                || *name == X_USER_ID
                || *name == X_USER_EMAIL
                || *name == X_USER_ROLE
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        forwarding_headers(req, headers);
        if let Some(principal) = principal {
            identity_headers(principal, headers);
        }

        tracing::debug!(
            target_url = %target,
            transport = transport.as_str(),
            "Forwarding request"
        );

        let sent = if may_have_body(req) {
            upstream.send_stream(payload).await
        } else {
            upstream.send().await
        };

        let response = sent.map_err(|err| {
            metrics::counter!(
                "upstream_failures_total",
                "route" => route.config().prefix.clone()
            )
            .increment(1);
            tracing::warn!(
                upstream = %route.config().upstream,
                error = %err,
                "Upstream request failed"
            );
            GatewayError::UpstreamUnavailable {
                upstream: route.config().upstream.clone(),
                source: anyhow::anyhow!(err.to_string()),
            }
        })?;

        let mut builder = HttpResponse::build(response.status());
        for (name, value) in end_to_end(response.headers()) {
            builder.append_header((name.clone(), value.clone()));
        }
        Ok(builder.streaming(response))
    }
}

/// Whether the inbound request can carry a body
///
/// HTTP/2 and later frame the body themselves, so neither `Content-Length`
/// nor `Transfer-Encoding` has to be present.
fn may_have_body(req: &HttpRequest) -> bool {
    let headers = req.headers();
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    if let Some(length) = headers.get(header::CONTENT_LENGTH) {
        return length.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) != Some(0);
    }
    req.version() >= Version::HTTP_2
        && !matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

fn forwarding_headers(req: &HttpRequest, headers: &mut HeaderMap) {
    let info = req.connection_info();

    if let Some(peer) = req.peer_addr() {
        let forwarded_for = match headers
            .get(&X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
        {
            Some(existing) => format!("{}, {}", existing, peer.ip()),
            None => peer.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(info.scheme()) {
        headers.insert(X_FORWARDED_PROTO, value);
    }
    if let Ok(value) = HeaderValue::from_str(info.host()) {
        headers.insert(X_FORWARDED_HOST, value);
    }
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .and_then(|id| HeaderValue::from_str(id.as_str()).ok())
        .or_else(|| req.headers().get(&X_REQUEST_ID).cloned());
    if let Some(request_id) = request_id {
        headers.insert(X_REQUEST_ID, request_id);
    }
}

fn identity_headers(principal: &Principal, headers: &mut HeaderMap) {
    headers.insert(X_USER_ID, HeaderValue::from(principal.user_id));
    if let Ok(value) = HeaderValue::from_str(&principal.email) {
        headers.insert(X_USER_EMAIL, value);
    }
    if let Ok(value) = HeaderValue::from_str(&principal.role) {
        headers.insert(X_USER_ROLE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::proxy::RouteTable;

    fn table(upstream: &str) -> RouteTable {
        RouteTable::new(&[RouteConfig {
            prefix: "/api".to_string(),
            upstream: upstream.to_string(),
            auth_required: false,
            rate_limit_tier: "default".to_string(),
            roles: None,
            timeout_ms: None,
        }])
        .unwrap()
    }

    fn forwarder(mesh_hosts: &[&str]) -> Forwarder {
        let config = ProxyConfig {
            mesh: MeshConfig {
                hosts: mesh_hosts.iter().map(|h| h.to_string()).collect(),
                relaxed_tls: true,
            },
            ..ProxyConfig::default()
        };
        let tls = UpstreamTls::new(&config.mesh).unwrap();
        Forwarder::new(&config, &tls)
    }

    #[actix_web::test]
    async fn test_transport_selection() {
        let forwarder = forwarder(&["students.internal"]);

        let plain = table("http://students.internal:3002");
        let route = plain.resolve("/api").unwrap().route;
        assert_eq!(forwarder.transport_for(route), Transport::Plain);

        let mesh = table("https://students.internal");
        let route = mesh.resolve("/api").unwrap().route;
        assert_eq!(forwarder.transport_for(route), Transport::Mesh);

        let external = table("https://payments.example.com");
        let route = external.resolve("/api").unwrap().route;
        assert_eq!(forwarder.transport_for(route), Transport::Secure);
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert(HeaderName::from_static("keep-alive"), HeaderValue::from_static("timeout=5"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(HeaderName::from_static("x-trace"), HeaderValue::from_static("1"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let kept: Vec<&str> = end_to_end(&headers).map(|(name, _)| name.as_str()).collect();
        assert_eq!(kept, vec!["content-type"]);
    }

    #[test]
    fn test_body_detection() {
        use actix_web::test::TestRequest;

        let get = TestRequest::get().version(Version::HTTP_2).to_http_request();
        assert!(!may_have_body(&get));

        let h1_post = TestRequest::post().to_http_request();
        assert!(!may_have_body(&h1_post));

        let empty = TestRequest::post()
            .insert_header((header::CONTENT_LENGTH, "0"))
            .to_http_request();
        assert!(!may_have_body(&empty));

        let sized = TestRequest::post()
            .insert_header((header::CONTENT_LENGTH, "12"))
            .to_http_request();
        assert!(may_have_body(&sized));

        let chunked = TestRequest::put()
            .insert_header((header::TRANSFER_ENCODING, "chunked"))
            .to_http_request();
        assert!(may_have_body(&chunked));

        // HTTP/2 frames the body without a length header
        let h2_post = TestRequest::post().version(Version::HTTP_2).to_http_request();
        assert!(may_have_body(&h2_post));
    }
}
