//! Ranking by geographic distance between inputs and backends.
//!
//! For every backend the great-circle distances from its IP location to the
//! location of each input host are summed; backends are returned nearest
//! aggregate first. Credentials are removed from every URI before any lookup.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::resolver::{GeoLocator, GeoPoint, HostResolver};
use super::uri::{host_of, strip_auth};
use super::{Middleware, TaskRequest};
use crate::constants::{EARTH_RADIUS_KM, MIDDLEWARE_DISTANCE};
use crate::errors::MiddlewareError;

/// Great-circle distance in kilometres (haversine).
pub fn great_circle_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Sorts backends by their aggregate distance. Backends without any
/// computable distance go last; ties keep their configured order.
pub fn order_by_total(backends: Vec<(String, Option<f64>)>) -> Vec<String> {
    let mut backends = backends;
    backends.sort_by(|(_, a), (_, b)| match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    backends.into_iter().map(|(uri, _)| uri).collect()
}

pub struct DistanceRanker {
    service_list: Vec<String>,
    resolver: Arc<dyn HostResolver>,
    locator: Arc<dyn GeoLocator>,
}

impl DistanceRanker {
    pub fn new(
        service_list: Vec<String>,
        resolver: Arc<dyn HostResolver>,
        locator: Arc<dyn GeoLocator>,
    ) -> Self {
        Self {
            service_list,
            resolver,
            locator,
        }
    }

    async fn resolve_uri(&self, uri: &str) -> Result<IpAddr, String> {
        let host = host_of(uri).ok_or_else(|| "URI has no host".to_string())?;
        self.resolver.resolve(&host).await
    }

    /// Rank `candidate_backends` for a task reading `input_uris`.
    ///
    /// Input resolution failures are fatal. A backend that cannot be resolved
    /// is dropped from the result; if none resolve the ranking fails.
    #[instrument(skip_all, fields(inputs = input_uris.len(), backends = candidate_backends.len()))]
    pub async fn rank(
        &self,
        input_uris: &[String],
        candidate_backends: &[String],
    ) -> Result<Vec<String>, MiddlewareError> {
        if input_uris.is_empty() {
            return Err(MiddlewareError::MiddlewareException {
                details: "No input URIs available.".to_string(),
            });
        }

        let mut input_ips = Vec::with_capacity(input_uris.len());
        for uri in input_uris {
            let ip = self
                .resolve_uri(uri)
                .await
                .map_err(|details| MiddlewareError::InputUriError {
                    uri: strip_auth(uri),
                    details,
                })?;
            input_ips.push(ip);
        }

        let mut backend_ips = Vec::with_capacity(candidate_backends.len());
        for uri in candidate_backends {
            match self.resolve_uri(uri).await {
                Ok(ip) => backend_ips.push((uri.clone(), ip)),
                Err(details) => {
                    warn!(tes_uri = %strip_auth(uri), error = %details, "Dropping unresolvable TES instance from ranking");
                }
            }
        }
        if backend_ips.is_empty() {
            return Err(MiddlewareError::TesUriError {
                uri: candidate_backends
                    .iter()
                    .map(|uri| strip_auth(uri))
                    .collect::<Vec<_>>()
                    .join(","),
                details: "no TES instance could be resolved".to_string(),
            });
        }

        let mut locations: HashMap<IpAddr, Option<GeoPoint>> = HashMap::new();
        let mut pairs_computed = 0usize;
        let mut totals = Vec::with_capacity(backend_ips.len());

        for (uri, backend_ip) in &backend_ips {
            let mut total: Option<f64> = None;
            for input_ip in &input_ips {
                let distance = if backend_ip == input_ip {
                    Some(0.0)
                } else {
                    let from = self.cached_location(&mut locations, *backend_ip).await;
                    let to = self.cached_location(&mut locations, *input_ip).await;
                    match (from, to) {
                        (Some(from), Some(to)) => Some(great_circle_km(from, to)),
                        _ => None,
                    }
                };
                if let Some(distance) = distance {
                    pairs_computed += 1;
                    total = Some(total.unwrap_or(0.0) + distance);
                }
            }
            debug!(tes_uri = %strip_auth(uri), total_km = ?total, "Aggregate distance computed");
            totals.push((uri.clone(), total));
        }

        if pairs_computed == 0 {
            return Err(MiddlewareError::IpDistanceCalculationError {
                details: "no IP address could be geolocated".to_string(),
            });
        }

        Ok(order_by_total(totals))
    }

    async fn cached_location(
        &self,
        locations: &mut HashMap<IpAddr, Option<GeoPoint>>,
        ip: IpAddr,
    ) -> Option<GeoPoint> {
        if let Some(point) = locations.get(&ip) {
            return *point;
        }
        let point = self.locator.locate(ip).await;
        if point.is_none() {
            debug!(%ip, "IP address could not be geolocated, skipping");
        }
        locations.insert(ip, point);
        point
    }
}

#[async_trait]
impl Middleware for DistanceRanker {
    fn name(&self) -> &str {
        MIDDLEWARE_DISTANCE
    }

    async fn apply(&self, mut request: TaskRequest) -> Result<TaskRequest, MiddlewareError> {
        request.ensure_json_object()?;
        let input_uris = request.input_uris();
        let ranked = self
            .rank(&input_uris, request.candidates(&self.service_list))
            .await?;
        request.tes_uris = ranked;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::resolver::{StaticGeoLocator, StaticHostResolver};
    use serde_json::json;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    /// Zurich input; B1 shares the input's IP, B2 sits in Frankfurt (~300 km),
    /// B3 in Lisbon (~1700 km).
    fn ranker() -> DistanceRanker {
        let resolver = StaticHostResolver::new()
            .with_host("data.example.org", ip("192.0.2.1"))
            .with_host("b1.example.org", ip("192.0.2.1"))
            .with_host("b2.example.org", ip("198.51.100.2"))
            .with_host("b3.example.org", ip("203.0.113.3"));
        let locator = StaticGeoLocator::new()
            .with_point(ip("192.0.2.1"), 47.3769, 8.5417)
            .with_point(ip("198.51.100.2"), 50.1109, 8.6821)
            .with_point(ip("203.0.113.3"), 38.7223, -9.1393);
        DistanceRanker::new(
            vec![
                "https://b3.example.org".to_string(),
                "https://b2.example.org".to_string(),
                "https://b1.example.org".to_string(),
            ],
            Arc::new(resolver),
            Arc::new(locator),
        )
    }

    #[test]
    fn test_great_circle_known_distance() {
        let zurich = GeoPoint {
            latitude: 47.3769,
            longitude: 8.5417,
        };
        let frankfurt = GeoPoint {
            latitude: 50.1109,
            longitude: 8.6821,
        };
        let km = great_circle_km(zurich, frankfurt);
        assert!((km - 304.0).abs() < 5.0, "got {km}");
        assert_eq!(great_circle_km(zurich, zurich), 0.0);
    }

    #[test]
    fn test_order_by_total_puts_unknown_last() {
        let ordered = order_by_total(vec![
            ("b2".to_string(), Some(500.0)),
            ("unknown".to_string(), None),
            ("b1".to_string(), Some(0.0)),
        ]);
        assert_eq!(ordered, vec!["b1", "b2", "unknown"]);
    }

    #[tokio::test]
    async fn test_nearest_backend_first() {
        let ranked = ranker()
            .rank(
                &["https://user:pw@data.example.org/file.bam".to_string()],
                &[
                    "https://b3.example.org".to_string(),
                    "https://b2.example.org".to_string(),
                    "https://b1.example.org".to_string(),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            ranked,
            vec![
                "https://b1.example.org",
                "https://b2.example.org",
                "https://b3.example.org"
            ]
        );
    }

    #[tokio::test]
    async fn test_no_inputs_is_an_error() {
        let err = ranker()
            .rank(&[], &["https://b1.example.org".to_string()])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MiddlewareError::MiddlewareException {
                details: "No input URIs available.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unresolvable_input_is_an_error() {
        let err = ranker()
            .rank(
                &["https://secret:pw@nowhere.example.org/x".to_string()],
                &["https://b1.example.org".to_string()],
            )
            .await
            .unwrap_err();
        match err {
            MiddlewareError::InputUriError { uri, .. } => {
                assert_eq!(uri, "https://nowhere.example.org/x");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unresolvable_backend_is_dropped() {
        let ranked = ranker()
            .rank(
                &["https://data.example.org/x".to_string()],
                &[
                    "https://gone.example.org".to_string(),
                    "https://b2.example.org".to_string(),
                ],
            )
            .await
            .unwrap();
        assert_eq!(ranked, vec!["https://b2.example.org"]);
    }

    #[tokio::test]
    async fn test_no_resolvable_backend_is_an_error() {
        let err = ranker()
            .rank(
                &["https://data.example.org/x".to_string()],
                &["https://gone.example.org".to_string()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MiddlewareError::TesUriError { .. }));
    }

    #[tokio::test]
    async fn test_no_geolocation_at_all_is_an_error() {
        let resolver = StaticHostResolver::new()
            .with_host("data.example.org", ip("192.0.2.50"))
            .with_host("b1.example.org", ip("192.0.2.51"));
        let ranker = DistanceRanker::new(
            vec!["https://b1.example.org".to_string()],
            Arc::new(resolver),
            Arc::new(StaticGeoLocator::new()),
        );
        let err = ranker
            .apply(TaskRequest::new(json!({
                "inputs": [{"url": "https://data.example.org/x", "path": "/x"}]
            })))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MiddlewareError::IpDistanceCalculationError { .. }
        ));
    }

    #[tokio::test]
    async fn test_apply_uses_payload_inputs() {
        let request = ranker()
            .apply(TaskRequest::new(json!({
                "inputs": [{"url": "https://data.example.org/x", "path": "/x"}],
                "executors": [{"image": "alpine", "command": ["true"]}]
            })))
            .await
            .unwrap();
        assert_eq!(request.tes_uris[0], "https://b1.example.org");
        assert_eq!(request.tes_uris.len(), 3);
    }

    #[tokio::test]
    async fn test_apply_ranks_earlier_choice_only() {
        let mut request = TaskRequest::new(json!({
            "inputs": [{"url": "https://data.example.org/x", "path": "/x"}]
        }));
        request.tes_uris = vec![
            "https://b3.example.org".to_string(),
            "https://b2.example.org".to_string(),
        ];

        let request = ranker().apply(request).await.unwrap();
        assert_eq!(
            request.tes_uris,
            vec!["https://b2.example.org", "https://b3.example.org"]
        );
    }
}
