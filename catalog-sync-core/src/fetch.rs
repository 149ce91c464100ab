//! Default HTTP implementation of the [`Fetcher`] contract.
//!
//! Two clients: a plain one that follows the process environment's proxy
//! settings, and an optional explicitly configured proxy client. A transport
//! error on the plain client (not an HTTP error status) triggers exactly one
//! retry through the explicit proxy; vendor CDNs behind strict egress rules
//! are the case this exists for.

use async_trait::async_trait;
use reqwest::{Client, Proxy, Response};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::contract::{FetchError, Fetcher};
use crate::vendor::VendorProfile;

pub struct HttpFetcher {
    client: Client,
    proxy_client: Option<Client>,
}

impl HttpFetcher {
    /// `fallback_proxy` is the address of the explicit proxy to try when the
    /// direct route fails, e.g. `http://192.168.50.2:8080`.
    pub fn new(fallback_proxy: Option<&str>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .build()
            .map_err(|e| FetchError::Transport(Box::new(e)))?;
        let proxy_client = match fallback_proxy {
            Some(addr) => {
                let proxy =
                    Proxy::all(addr).map_err(|e| FetchError::Transport(Box::new(e)))?;
                Some(
                    Client::builder()
                        .proxy(proxy)
                        .build()
                        .map_err(|e| FetchError::Transport(Box::new(e)))?,
                )
            }
            None => None,
        };
        Ok(HttpFetcher {
            client,
            proxy_client,
        })
    }

    /// Send through the plain client; on a transport error fall back once to
    /// the explicit proxy client, if one is configured.
    async fn send_with_fallback(
        &self,
        vendor: &VendorProfile,
        build: impl Fn(&Client) -> reqwest::RequestBuilder,
    ) -> Result<Response, FetchError> {
        match build(&self.client).send().await {
            Ok(resp) => check_status(resp),
            Err(e) => {
                let Some(proxy_client) = &self.proxy_client else {
                    error!(vendor = %vendor.name, error = %e, "request failed, no fallback proxy configured");
                    return Err(FetchError::Transport(Box::new(e)));
                };
                warn!(
                    vendor = %vendor.name,
                    error = %e,
                    "request failed on direct route, retrying through explicit proxy"
                );
                match build(proxy_client).send().await {
                    Ok(resp) => check_status(resp),
                    Err(e2) => {
                        error!(vendor = %vendor.name, error = %e2, "request failed through explicit proxy");
                        Err(FetchError::Transport(Box::new(e2)))
                    }
                }
            }
        }
    }
}

fn check_status(resp: Response) -> Result<Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(FetchError::Status(status.as_u16()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn probe_size(&self, vendor: &VendorProfile) -> Result<u64, FetchError> {
        let resp = self
            .send_with_fallback(vendor, |c| c.head(&vendor.download_url))
            .await?;
        let len = resp
            .content_length()
            .ok_or(FetchError::MissingContentLength)?;
        debug!(vendor = %vendor.name, content_length = len, "probed catalog size");
        Ok(len)
    }

    async fn download(
        &self,
        vendor: &VendorProfile,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        let resp = self
            .send_with_fallback(vendor, |c| c.get(&vendor.download_url))
            .await?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(Box::new(e)))?;
        let dest = dest_dir.join(&vendor.artifact_file_name);
        tokio::fs::write(&dest, &body)
            .await
            .map_err(|e| FetchError::Transport(Box::new(e)))?;
        debug!(vendor = %vendor.name, path = %dest.display(), bytes = body.len(), "saved catalog archive");
        Ok(dest)
    }
}
