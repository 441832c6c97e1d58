//! Cloudflare CDN purge.
//!
//! Purges every cached asset for the site's hosts through the zone
//! `purge_cache` endpoint. Runs last in the cascade.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::cascade::{Invalidator, InvalidatorError};

pub const CLOUDFLARE_SLUG: &str = "cloudflare";

const BACKEND: &str = "cloudflare";
const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";
const MAX_HOSTS: usize = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudflareConfig {
    /// API token with the Zone.Cache Purge permission.
    pub api_token: Option<String>,
    pub zone_id: Option<String>,
    /// Public site URL; its host and `www.` twin are purged.
    pub site_url: Option<String>,
    pub extra_hosts: Vec<String>,
    pub api_base: String,
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            zone_id: None,
            site_url: None,
            extra_hosts: Vec::new(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl CloudflareConfig {
    pub fn is_configured(&self) -> bool {
        non_blank(&self.api_token).is_some() && non_blank(&self.zone_id).is_some()
    }

    /// Hosts to purge: the site host, its `www.` twin, then any extras.
    pub fn purge_hosts(&self) -> Result<Vec<String>, InvalidatorError> {
        let mut hosts: Vec<String> = Vec::new();
        let mut push = |host: String| {
            let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
            if !host.is_empty() && !hosts.contains(&host) {
                hosts.push(host);
            }
        };

        if let Some(site) = non_blank(&self.site_url) {
            let url = Url::parse(site).map_err(|err| InvalidatorError::Invalid {
                backend: BACKEND,
                message: format!("site url `{site}`: {err}"),
            })?;
            let host = url.host_str().ok_or_else(|| InvalidatorError::Invalid {
                backend: BACKEND,
                message: format!("site url `{site}` has no host"),
            })?;

            let host = host.to_ascii_lowercase();
            let twin = match host.strip_prefix("www.") {
                Some(bare) => bare.to_string(),
                None => format!("www.{host}"),
            };
            push(host);
            push(twin);
        }

        for extra in &self.extra_hosts {
            push(extra.clone());
        }

        if hosts.is_empty() {
            return Err(InvalidatorError::Invalid {
                backend: BACKEND,
                message: "no hosts to purge".to_string(),
            });
        }
        if hosts.len() > MAX_HOSTS {
            return Err(InvalidatorError::Invalid {
                backend: BACKEND,
                message: format!("{} hosts exceeds the limit of {MAX_HOSTS}", hosts.len()),
            });
        }

        Ok(hosts)
    }

    fn endpoint(&self, zone: &str) -> String {
        format!(
            "{}/zones/{zone}/purge_cache",
            self.api_base.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct PurgeRequest<'a> {
    hosts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PurgeResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

pub struct CloudflareInvalidator {
    client: Client,
    config: CloudflareConfig,
}

impl CloudflareInvalidator {
    pub fn new(config: CloudflareConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: CloudflareConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Invalidator for CloudflareInvalidator {
    fn slug(&self) -> &str {
        CLOUDFLARE_SLUG
    }

    fn is_available(&self) -> bool {
        self.config.is_configured()
    }

    fn priority(&self) -> i32 {
        100
    }

    fn delay(&self) -> i64 {
        100
    }

    async fn flush(&self) -> Result<(), InvalidatorError> {
        let (Some(token), Some(zone)) = (
            non_blank(&self.config.api_token),
            non_blank(&self.config.zone_id),
        ) else {
            return Err(InvalidatorError::Invalid {
                backend: BACKEND,
                message: "api token and zone id are required".to_string(),
            });
        };

        let hosts = self.config.purge_hosts()?;
        let response = self
            .client
            .post(self.config.endpoint(zone))
            .bearer_auth(token)
            .json(&PurgeRequest { hosts: &hosts })
            .send()
            .await
            .map_err(|err| InvalidatorError::Transport {
                backend: BACKEND,
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Cloudflare purge returned an error status");
            return Err(InvalidatorError::Status {
                backend: BACKEND,
                status: status.as_u16(),
                body,
            });
        }

        let body: PurgeResponse =
            response
                .json()
                .await
                .map_err(|err| InvalidatorError::Malformed {
                    backend: BACKEND,
                    message: err.to_string(),
                })?;

        if !body.success {
            let message = body
                .errors
                .iter()
                .map(|error| format!("{} ({})", error.message, error.code))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(InvalidatorError::Rejected {
                backend: BACKEND,
                message: if message.is_empty() {
                    "success=false".to_string()
                } else {
                    message
                },
            });
        }

        info!(hosts = hosts.len(), "Cloudflare cache purged");
        Ok(())
    }
}
