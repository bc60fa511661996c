//! DNS over HTTPS (RFC 8484) over HTTP/1.1, HTTP/2 or HTTP/3.

use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use bytes::{Buf, Bytes, BytesMut};
use data_encoding::BASE64URL_NOPAD;
use qlook_proto::Message;
use tokio::runtime::Runtime;
use tracing::debug;

use super::quic::{client_endpoint, connect, new_runtime, quic_client_config};
use super::{parse_reply, Common, Exchange};
use crate::error::ConfigError;

pub(crate) const DNS_MESSAGE: &str = "application/dns-message";

/// Replies are read up to this size, the largest possible DNS message.
const MAX_BODY_LEN: u64 = u16::MAX as u64;

type H3SendRequest = h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    /// The query is sent base64url-encoded in the `dns` query parameter.
    Get,
    /// The query is the request body.
    Post,
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            _ => Err(ConfigError::UnsupportedProtocol(format!("HTTP method {}", s))),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HttpVersion {
    Http1,
    Http2,
    Http3,
}

/// Request settings of a DoH transport.
#[derive(Clone, Debug)]
pub struct Settings {
    pub method: HttpMethod,
    pub version: HttpVersion,
    pub headers: BTreeMap<String, Vec<String>>,
    pub user_agent: String,
    /// Path MTU discovery, only relevant for HTTP/3.
    pub pmtud: bool,
}

struct H3Client {
    runtime: Runtime,
    endpoint: Option<quinn::Endpoint>,
    send_request: Option<H3SendRequest>,
}

pub struct HttpTransport {
    url: http::Uri,
    settings: Settings,
    common: Common,
    tls: Arc<rustls::ClientConfig>,
    agent: Option<ureq::Agent>,
    h2: Option<reqwest::blocking::Client>,
    h3: Option<H3Client>,
}

impl HttpTransport {
    /// Creates a transport for the DoH endpoint `server`. A missing scheme defaults to `https`
    /// and a missing path to `/dns-query`.
    pub fn new(
        server: &str,
        settings: Settings,
        common: Common,
        tls: Arc<rustls::ClientConfig>,
    ) -> Result<Self, ConfigError> {
        let url = normalize_url(server)?;
        if settings.version == HttpVersion::Http3 && url.scheme_str() != Some("https") {
            return Err(ConfigError::invalid_server(server, "HTTP/3 requires https"));
        }
        Ok(Self {
            url,
            settings,
            common,
            tls,
            agent: None,
            h2: None,
            h3: None,
        })
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    /// The URL queries are sent to.
    pub fn url(&self) -> String {
        self.url.to_string()
    }

    fn get_url(&self, data: &[u8]) -> String {
        let url = self.url.to_string();
        let separator = if self.url.query().is_some() { '&' } else { '?' };
        format!("{}{}dns={}", url, separator, BASE64URL_NOPAD.encode(data))
    }

    fn send_http1(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let agent = match self.agent.take() {
            Some(agent) => agent,
            None => ureq::AgentBuilder::new()
                .tls_config(self.tls.clone())
                .timeout(self.common.timeout)
                .user_agent(&self.settings.user_agent)
                .build(),
        };

        let mut request = match self.settings.method {
            HttpMethod::Get => agent.get(&self.get_url(data)),
            HttpMethod::Post => agent
                .post(&self.url.to_string())
                .set("Content-Type", DNS_MESSAGE),
        }
        .set("Accept", DNS_MESSAGE);
        for (name, values) in &self.settings.headers {
            for value in values {
                request = request.set(name, value);
            }
        }

        let response = match self.settings.method {
            HttpMethod::Get => request.call(),
            HttpMethod::Post => request.send_bytes(data),
        };
        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => bail!("HTTP response code {}, expected 200.", code),
            Err(e) => return Err(e).context("HTTP request unsuccessful."),
        };
        if response.status() != 200 {
            bail!("HTTP response code {}, expected 200.", response.status());
        }

        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY_LEN)
            .read_to_end(&mut body)
            .context("Could not read the HTTP response.")?;

        if self.common.reuse_conn {
            self.agent = Some(agent);
        }
        Ok(body)
    }

    fn send_http2(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let client = match self.h2.take() {
            Some(client) => client,
            None => {
                let mut tls = (*self.tls).clone();
                tls.alpn_protocols = vec![b"h2".to_vec()];
                reqwest::blocking::Client::builder()
                    .use_preconfigured_tls(tls)
                    .http2_prior_knowledge()
                    .timeout(self.common.timeout)
                    .user_agent(self.settings.user_agent.as_str())
                    .build()
                    .context("Could not create HTTP/2 client.")?
            }
        };

        let mut request = match self.settings.method {
            HttpMethod::Get => client.get(self.get_url(data)),
            HttpMethod::Post => client
                .post(self.url.to_string())
                .header("Content-Type", DNS_MESSAGE)
                .body(data.to_vec()),
        }
        .header("Accept", DNS_MESSAGE);
        for (name, values) in &self.settings.headers {
            for value in values {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.send().context("HTTP/2 request unsuccessful.")?;
        if response.status() != reqwest::StatusCode::OK {
            bail!("HTTP response code {}, expected 200.", response.status().as_u16());
        }
        let body = response
            .bytes()
            .context("Could not read the HTTP/2 response.")?;

        if self.common.reuse_conn {
            self.h2 = Some(client);
        }
        Ok(body.to_vec())
    }

    fn send_http3(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let host = self
            .url
            .host()
            .ok_or_else(|| anyhow!("DoH URL {} has no host.", self.url))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = self.url.port_u16().unwrap_or(443);
        let remote = std::net::ToSocketAddrs::to_socket_addrs(&(host.as_str(), port))
            .with_context(|| format!("Could not resolve {}.", host))?
            .next()
            .ok_or_else(|| anyhow!("{} has no addresses.", host))?;

        let mut client = match self.h3.take() {
            Some(client) => client,
            None => H3Client {
                runtime: new_runtime()?,
                endpoint: None,
                send_request: None,
            },
        };

        let request = self.h3_request(data)?;
        let body = match self.settings.method {
            HttpMethod::Get => None,
            HttpMethod::Post => Some(Bytes::copy_from_slice(data)),
        };

        let mut tls = (*self.tls).clone();
        tls.alpn_protocols = vec![b"h3".to_vec()];
        let config = quic_client_config(Arc::new(tls), self.settings.pmtud, self.common.timeout)?;
        let timeout = self.common.timeout;

        let H3Client {
            runtime,
            endpoint,
            send_request,
        } = &mut client;
        let result = runtime.block_on(async {
            if endpoint.is_none() {
                *endpoint = Some(client_endpoint(remote)?);
            }
            let endpoint = endpoint
                .as_ref()
                .ok_or_else(|| anyhow!("QUIC endpoint missing."))?;

            let mut sender = match send_request.take() {
                Some(sender) => sender,
                None => {
                    let conn = connect(endpoint, config, remote, &host, timeout).await?;
                    let (mut driver, sender) = h3::client::new(h3_quinn::Connection::new(conn))
                        .await
                        .context("Could not set up HTTP/3 connection.")?;
                    tokio::spawn(async move {
                        let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
                    });
                    sender
                }
            };

            let reply = tokio::time::timeout(timeout, h3_exchange(&mut sender, request, body))
                .await
                .map_err(|_| anyhow!("{} did not reply in time.", remote))??;
            *send_request = Some(sender);
            Ok::<_, anyhow::Error>(reply)
        });

        if self.common.reuse_conn && result.is_ok() {
            self.h3 = Some(client);
        }
        result
    }

    fn h3_request(&self, data: &[u8]) -> Result<http::Request<()>> {
        let mut builder = match self.settings.method {
            HttpMethod::Get => http::Request::get(self.get_url(data)),
            HttpMethod::Post => http::Request::post(self.url.to_string())
                .header("content-type", DNS_MESSAGE),
        }
        .header("accept", DNS_MESSAGE)
        .header("user-agent", self.settings.user_agent.as_str());
        for (name, values) in &self.settings.headers {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        builder.body(()).context("Could not build HTTP/3 request.")
    }
}

async fn h3_exchange(
    sender: &mut H3SendRequest,
    request: http::Request<()>,
    body: Option<Bytes>,
) -> Result<Vec<u8>> {
    let mut stream = sender
        .send_request(request)
        .await
        .context("Could not send HTTP/3 request.")?;
    if let Some(body) = body {
        stream
            .send_data(body)
            .await
            .context("Could not send HTTP/3 request body.")?;
    }
    stream
        .finish()
        .await
        .context("Could not finish HTTP/3 request.")?;

    let response = stream
        .recv_response()
        .await
        .context("Could not receive HTTP/3 response.")?;
    if response.status() != http::StatusCode::OK {
        bail!("HTTP response code {}, expected 200.", response.status().as_u16());
    }

    let mut body = BytesMut::new();
    while let Some(mut chunk) = stream
        .recv_data()
        .await
        .context("Could not read HTTP/3 response body.")?
    {
        body.extend_from_slice(chunk.chunk());
        chunk.advance(chunk.remaining());
        if body.len() as u64 > MAX_BODY_LEN {
            bail!("HTTP/3 response is larger than any DNS message.");
        }
    }
    Ok(body.to_vec())
}

impl Exchange for HttpTransport {
    fn exchange(&mut self, query: &Message) -> Result<Message> {
        let data = query.encode().context("Could not encode query.")?;
        debug!(url = %self.url, version = ?self.settings.version, "sending DoH query");
        let reply = match self.settings.version {
            HttpVersion::Http1 => self.send_http1(&data)?,
            HttpVersion::Http2 => self.send_http2(&data)?,
            HttpVersion::Http3 => self.send_http3(&data)?,
        };
        parse_reply(&reply, query.header.msg_id)
    }

    fn close(&mut self) {
        self.agent = None;
        self.h2 = None;
        if let Some(mut client) = self.h3.take() {
            if let Some(endpoint) = client.endpoint.take() {
                endpoint.close(0u32.into(), b"");
            }
        }
    }
}

/// Adds the `https` scheme and the `/dns-query` path if they are missing.
///
/// # Examples
/// ```rust
/// use qlook::transport::https::normalize_url;
///
/// assert_eq!(normalize_url("dns.example").unwrap().to_string(), "https://dns.example/dns-query");
/// assert_eq!(
///     normalize_url("http://192.0.2.1:8080/resolve?ct").unwrap().to_string(),
///     "http://192.0.2.1:8080/resolve?ct"
/// );
/// assert!(normalize_url("ftp://dns.example").is_err());
/// ```
pub fn normalize_url(server: &str) -> Result<http::Uri, ConfigError> {
    let url = if server.contains("://") {
        server.to_string()
    } else {
        format!("https://{}", server)
    };
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| ConfigError::invalid_server(server, e.to_string()))?;

    let scheme = match uri.scheme_str() {
        Some("https") => "https",
        Some("http") => "http",
        _ => return Err(ConfigError::invalid_server(server, "scheme must be http or https")),
    };
    let authority = uri
        .authority()
        .ok_or_else(|| ConfigError::invalid_server(server, "missing host"))?
        .clone();

    let path_and_query = match uri.path_and_query() {
        Some(pq) if pq.path() != "/" && !pq.path().is_empty() => pq.as_str().to_string(),
        Some(pq) => match pq.query() {
            Some(query) => format!("/dns-query?{}", query),
            None => "/dns-query".to_string(),
        },
        None => "/dns-query".to_string(),
    };

    http::Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ConfigError::invalid_server(server, e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::{build_tls_config, TlsOptions};

    fn transport(method: HttpMethod, version: HttpVersion, server: &str) -> Result<HttpTransport, ConfigError> {
        let settings = Settings {
            method,
            version,
            headers: BTreeMap::new(),
            user_agent: "qlook-test".into(),
            pmtud: true,
        };
        let common = Common {
            server: server.into(),
            reuse_conn: false,
            timeout: Duration::from_secs(1),
        };
        let tls = build_tls_config(&TlsOptions::default()).unwrap();
        HttpTransport::new(server, settings, common, tls)
    }

    #[test]
    fn get_url_carries_the_query() {
        let t = transport(HttpMethod::Get, HttpVersion::Http1, "https://dns.example/dns-query")
            .unwrap();
        assert_eq!(t.get_url(&[0xab, 0xcd, 0xef]), "https://dns.example/dns-query?dns=q83v");

        let t = transport(HttpMethod::Get, HttpVersion::Http1, "https://dns.example/q?a=b").unwrap();
        assert_eq!(t.get_url(&[0xff]), "https://dns.example/q?a=b&dns=_w");
    }

    #[test]
    fn http3_needs_https() {
        assert!(transport(HttpMethod::Post, HttpVersion::Http3, "http://dns.example").is_err());
        assert!(transport(HttpMethod::Post, HttpVersion::Http3, "dns.example").is_ok());
    }

    #[test]
    fn methods() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!("GET".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert!("PUT".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn root_path_becomes_dns_query() {
        assert_eq!(
            normalize_url("https://dns.example/").unwrap().to_string(),
            "https://dns.example/dns-query"
        );
    }
}
