//! Host-to-IP and IP-to-location lookups used by distance ranking.
//!
//! Both are external dependencies, so they sit behind traits: production uses
//! DNS through tokio and an HTTP geolocation service, tests plug in static
//! tables.

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use crate::constants::DEFAULT_DNS_TIMEOUT;

/// Latitude/longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve a bare host name (no scheme, no credentials) to one IP address.
    async fn resolve(&self, host: &str) -> Result<IpAddr, String>;
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// Locate an IP address; `None` when the location is unknown.
    async fn locate(&self, ip: IpAddr) -> Option<GeoPoint>;
}

/// System DNS resolution via `tokio::net::lookup_host`, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct DnsHostResolver {
    timeout: Duration,
}

impl DnsHostResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DnsHostResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DNS_TIMEOUT)
    }
}

#[async_trait]
impl HostResolver for DnsHostResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, String> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let mut addresses = tokio::time::timeout(self.timeout, tokio::net::lookup_host((host, 0)))
            .await
            .map_err(|_| format!("lookup of {} timed out after {:?}", host, self.timeout))?
            .map_err(|e| e.to_string())?;
        addresses
            .next()
            .map(|address| address.ip())
            .ok_or_else(|| format!("no address records for {}", host))
    }
}

#[derive(Debug, Deserialize)]
struct GeolocationResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(alias = "latitude")]
    lat: Option<f64>,
    #[serde(alias = "longitude")]
    lon: Option<f64>,
}

/// Geolocation over HTTP: `GET {base_url}/{ip}` returning `lat`/`lon`.
///
/// Results, including misses, are cached so a burst of submissions against
/// the same backends does not hammer the service.
pub struct HttpGeoLocator {
    http_client: reqwest::Client,
    base_url: String,
    cache: Cache<IpAddr, Option<GeoPoint>>,
}

impl HttpGeoLocator {
    pub fn new(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(60 * 60))
            .build();
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache,
        }
    }

    async fn fetch(&self, ip: IpAddr) -> Option<GeoPoint> {
        let url = format!("{}/{}", self.base_url, ip);
        let response = match self.http_client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(%ip, status = response.status().as_u16(), "Geolocation lookup rejected");
                return None;
            }
            Err(e) => {
                debug!(%ip, error = %e, "Geolocation lookup failed");
                return None;
            }
        };

        let body: GeolocationResponse = response.json().await.ok()?;
        if body.status.as_deref().is_some_and(|status| status != "success") {
            return None;
        }
        Some(GeoPoint {
            latitude: body.lat?,
            longitude: body.lon?,
        })
    }
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn locate(&self, ip: IpAddr) -> Option<GeoPoint> {
        if let Some(cached) = self.cache.get(&ip).await {
            return cached;
        }
        let point = self.fetch(ip).await;
        self.cache.insert(ip, point).await;
        point
    }
}

/// Fixed host table, for tests and air-gapped deployments.
#[derive(Debug, Default, Clone)]
pub struct StaticHostResolver {
    hosts: HashMap<String, IpAddr>,
}

impl StaticHostResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, ip: IpAddr) -> Self {
        self.hosts.insert(host.to_string(), ip);
        self
    }
}

#[async_trait]
impl HostResolver for StaticHostResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, String> {
        self.hosts
            .get(host)
            .copied()
            .ok_or_else(|| format!("unknown host {}", host))
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticGeoLocator {
    points: HashMap<IpAddr, GeoPoint>,
}

impl StaticGeoLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_point(mut self, ip: IpAddr, latitude: f64, longitude: f64) -> Self {
        self.points.insert(
            ip,
            GeoPoint {
                latitude,
                longitude,
            },
        );
        self
    }
}

#[async_trait]
impl GeoLocator for StaticGeoLocator {
    async fn locate(&self, ip: IpAddr) -> Option<GeoPoint> {
        self.points.get(&ip).copied()
    }
}
