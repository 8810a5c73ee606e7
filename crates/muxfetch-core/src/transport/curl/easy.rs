//! Per-transfer Easy2 setup: URL, headers, timeouts and TLS trust.

use std::path::PathBuf;
use std::time::Duration;

use curl::easy::{Easy2, List, SslVersion};
use curl::multi::{Easy2Handle, Multi};
use tracing::warn;

use crate::config::TransportConfig;
use crate::resource::Resource;
use crate::response::{classify_curl_error, FetchError};

use super::handler::Collector;

const MAX_REDIRECTS: u32 = 10;

/// Options applied to every easy handle, resolved once at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct EasySettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub user_agent: String,
    /// Readable CA bundle, or `None` for the system trust store.
    pub ca_bundle: Option<PathBuf>,
}

impl EasySettings {
    pub fn from_config(cfg: &TransportConfig) -> Self {
        let ca_bundle = match &cfg.ca_bundle {
            Some(path) => match std::fs::read(path) {
                Ok(pem) if !pem.is_empty() => Some(path.clone()),
                Ok(_) => {
                    warn!(
                        "could not load list of certificate authorities: {} is empty",
                        path.display()
                    );
                    None
                }
                Err(e) => {
                    warn!(
                        "could not load list of certificate authorities from {}: {}",
                        path.display(),
                        e
                    );
                    None
                }
            },
            None => None,
        };
        Self {
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            timeout: Duration::from_secs(cfg.timeout_secs),
            follow_redirects: cfg.follow_redirects,
            user_agent: cfg.user_agent.clone(),
            ca_bundle,
        }
    }
}

fn configure(easy: &mut Easy2<Collector>, settings: &EasySettings, resource: &Resource) -> Result<(), curl::Error> {
    easy.url(&resource.url)?;
    easy.follow_location(settings.follow_redirects)?;
    easy.max_redirections(MAX_REDIRECTS)?;
    easy.connect_timeout(settings.connect_timeout)?;
    easy.timeout(settings.timeout)?;
    easy.useragent(&settings.user_agent)?;
    // Empty string: accept every encoding libcurl can decode.
    easy.accept_encoding("")?;
    // Secure protocols only.
    easy.ssl_min_max_version(SslVersion::Tlsv12, SslVersion::Default)?;
    if let Some(ca) = &settings.ca_bundle {
        easy.cainfo(ca)?;
    }
    if !resource.headers.is_empty() {
        let mut list = List::new();
        for (k, v) in &resource.headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))?;
        }
        easy.http_headers(list)?;
    }
    Ok(())
}

/// Build an easy handle for `resource` and add it to the multi handle.
pub(super) fn add_to_multi(
    multi: &Multi,
    settings: &EasySettings,
    resource: &Resource,
) -> Result<Easy2Handle<Collector>, FetchError> {
    let mut easy = Easy2::new(Collector::default());
    configure(&mut easy, settings, resource).map_err(|e| classify_curl_error(&e))?;
    multi
        .add2(easy)
        .map_err(|e| FetchError::Transport(format!("curl multi add: {}", e)))
}
