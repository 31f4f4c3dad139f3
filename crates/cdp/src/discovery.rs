//! DevTools endpoint discovery over `/json/version`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{CdpError, Result};

/// Loopback names a local browser may answer on.
const LOOPBACK_HOSTS: [&str; 2] = ["127.0.0.1", "localhost"];

/// The fields of `/json/version` this driver relies on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpVersionInfo {
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser", default)]
	pub browser: Option<String>,
}

/// Reusable client for a local browser's version endpoint.
#[derive(Debug, Clone)]
pub struct EndpointDiscovery {
	http: reqwest::Client,
}

impl EndpointDiscovery {
	/// `request_timeout` bounds each HTTP request, not the whole lookup.
	pub fn new(request_timeout: Duration) -> Result<Self> {
		let http = reqwest::Client::builder()
			.timeout(request_timeout)
			.no_proxy()
			.build()
			.map_err(|e| CdpError::Discovery(format!("http client: {}", e)))?;
		Ok(Self { http })
	}

	/// Asks every loopback host in turn; the first usable answer wins.
	pub async fn version(&self, port: u16) -> Result<CdpVersionInfo> {
		let mut failures = Vec::with_capacity(LOOPBACK_HOSTS.len());
		for host in LOOPBACK_HOSTS {
			match self.version_at(&format!("http://{}:{}/json/version", host, port)).await {
				Ok(info) => return Ok(info),
				Err(reason) => failures.push(format!("{}: {}", host, reason)),
			}
		}
		Err(CdpError::Discovery(format!("port {}: {}", port, failures.join("; "))))
	}

	async fn version_at(&self, url: &str) -> std::result::Result<CdpVersionInfo, String> {
		let response = self.http.get(url).send().await.map_err(|e| e.without_url().to_string())?;
		let status = response.status();
		if !status.is_success() {
			return Err(format!("HTTP {}", status));
		}
		let info: CdpVersionInfo = response.json().await.map_err(|e| format!("bad version payload: {}", e.without_url()))?;
		if !info.web_socket_debugger_url.starts_with("ws") {
			return Err(format!("not a websocket url: {:?}", info.web_socket_debugger_url));
		}
		Ok(info)
	}
}
