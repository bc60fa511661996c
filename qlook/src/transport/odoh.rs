//! Oblivious DNS over HTTPS (RFC 9230).
//!
//! Queries are encrypted to the target's public key and sent to a proxy, which forwards them to
//! the target without learning their content. The target never sees the client's address.

use std::io::Read;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use odoh_rs::{
    ObliviousDoHConfigContents, ObliviousDoHConfigs, ObliviousDoHMessage,
    ObliviousDoHMessagePlaintext,
};
use qlook_proto::Message;
use tracing::debug;

use super::https::normalize_url;
use super::{parse_reply, Common, Exchange};
use crate::error::ConfigError;

const ODOH_MESSAGE: &str = "application/oblivious-dns-message";
const CONFIGS_PATH: &str = "/.well-known/odohconfigs";
const MAX_BODY_LEN: u64 = u16::MAX as u64 + 1024;

pub struct OdohTransport {
    target: http::Uri,
    proxy: http::Uri,
    common: Common,
    tls: Arc<rustls::ClientConfig>,
    agent: Option<ureq::Agent>,
    config: Option<ObliviousDoHConfigContents>,
}

impl OdohTransport {
    /// Creates a transport querying `target` through `proxy`. Both are DoH-style URLs.
    pub fn new(
        target: &str,
        proxy: &str,
        common: Common,
        tls: Arc<rustls::ClientConfig>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            target: normalize_url(target)?,
            proxy: normalize_proxy(proxy)?,
            common,
            tls,
            agent: None,
            config: None,
        })
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    fn agent(&mut self) -> ureq::Agent {
        match &self.agent {
            Some(agent) => agent.clone(),
            None => {
                let agent = ureq::AgentBuilder::new()
                    .tls_config(self.tls.clone())
                    .timeout(self.common.timeout)
                    .build();
                if self.common.reuse_conn {
                    self.agent = Some(agent.clone());
                }
                agent
            }
        }
    }

    /// The proxy URL with the target encoded in its query parameters.
    fn proxy_url(&self) -> Result<String> {
        let host = self
            .target
            .authority()
            .ok_or_else(|| anyhow!("ODoH target {} has no host.", self.target))?;
        let separator = if self.proxy.query().is_some() { '&' } else { '?' };
        Ok(format!(
            "{}{}targethost={}&targetpath={}",
            self.proxy,
            separator,
            host,
            self.target.path()
        ))
    }

    /// Fetches the target's public key configuration, once per transport.
    fn load_target_config(&mut self, agent: &ureq::Agent) -> Result<()> {
        if self.config.is_some() {
            return Ok(());
        }

        let authority = self
            .target
            .authority()
            .ok_or_else(|| anyhow!("ODoH target {} has no host.", self.target))?;
        let url = format!(
            "{}://{}{}",
            self.target.scheme_str().unwrap_or("https"),
            authority,
            CONFIGS_PATH
        );
        debug!(url = url.as_str(), "fetching ODoH configs");
        let body = read_body(agent.get(&url).call()).context("Could not fetch ODoH configs.")?;

        let configs: ObliviousDoHConfigs = odoh_rs::parse(&mut Bytes::from(body))
            .context("Could not parse ODoH configs.")?;
        let config: ObliviousDoHConfigContents = configs
            .supported()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Target offers no supported ODoH config."))?
            .into();

        self.config = Some(config);
        Ok(())
    }
}

impl Exchange for OdohTransport {
    fn exchange(&mut self, query: &Message) -> Result<Message> {
        let data = query.encode().context("Could not encode query.")?;
        let agent = self.agent();
        self.load_target_config(&agent)?;
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("ODoH config missing."))?;

        let plaintext = ObliviousDoHMessagePlaintext::new(&data, 0);
        let (encrypted, secret) =
            odoh_rs::encrypt_query(&plaintext, config, &mut rand::thread_rng())
                .context("Could not encrypt ODoH query.")?;
        let body = odoh_rs::compose(&encrypted)
            .context("Could not encode ODoH query.")?
            .freeze();

        let url = self.proxy_url()?;
        debug!(url = url.as_str(), "sending ODoH query");
        let response = agent
            .post(&url)
            .set("Content-Type", ODOH_MESSAGE)
            .set("Accept", ODOH_MESSAGE)
            .send_bytes(&body);
        let reply = read_body(response).context("ODoH request unsuccessful.")?;

        let reply: ObliviousDoHMessage = odoh_rs::parse(&mut Bytes::from(reply))
            .context("Could not parse ODoH reply.")?;
        let reply = odoh_rs::decrypt_response(&plaintext, &reply, secret)
            .context("Could not decrypt ODoH reply.")?;
        parse_reply(&reply.into_msg(), query.header.msg_id)
    }

    fn close(&mut self) {
        self.agent = None;
    }
}

fn read_body(response: Result<ureq::Response, ureq::Error>) -> Result<Vec<u8>> {
    let response = match response {
        Ok(response) => response,
        Err(ureq::Error::Status(code, _)) => bail!("HTTP response code {}, expected 200.", code),
        Err(e) => return Err(e.into()),
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
    Ok(body)
}

/// Like [`normalize_url`], but a missing path becomes `/proxy`.
fn normalize_proxy(proxy: &str) -> Result<http::Uri, ConfigError> {
    let has_path = proxy
        .split_once("://")
        .map_or(proxy, |(_, rest)| rest)
        .trim_end_matches('/')
        .contains('/');
    if has_path {
        normalize_url(proxy)
    } else {
        normalize_url(&format!("{}/proxy", proxy.trim_end_matches('/')))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::{build_tls_config, TlsOptions};

    fn transport(target: &str, proxy: &str) -> OdohTransport {
        let common = Common {
            server: target.into(),
            reuse_conn: false,
            timeout: Duration::from_secs(1),
        };
        let tls = build_tls_config(&TlsOptions::default()).unwrap();
        OdohTransport::new(target, proxy, common, tls).unwrap()
    }

    #[test]
    fn proxy_url_names_the_target() {
        let t = transport("odoh.example", "https://proxy.example/proxy");
        assert_eq!(
            t.proxy_url().unwrap(),
            "https://proxy.example/proxy?targethost=odoh.example&targetpath=/dns-query"
        );
    }

    #[test]
    fn proxy_path_defaults() {
        let t = transport("https://odoh.example:8443/q", "proxy.example");
        assert_eq!(
            t.proxy_url().unwrap(),
            "https://proxy.example/proxy?targethost=odoh.example:8443&targetpath=/q"
        );
    }

    #[test]
    fn invalid_proxy_is_a_config_error() {
        let common = Common {
            server: "odoh.example".into(),
            reuse_conn: false,
            timeout: Duration::from_secs(1),
        };
        let tls = build_tls_config(&TlsOptions::default()).unwrap();
        assert!(matches!(
            OdohTransport::new("odoh.example", "ftp://proxy.example", common, tls),
            Err(ConfigError::InvalidServer { .. })
        ));
    }
}
