//! Application-wide constants

/// Registered ranking middleware names
pub(crate) const MIDDLEWARE_DISTANCE: &str = "distance";
pub(crate) const MIDDLEWARE_RANDOM: &str = "random";

/// Backend implementation that needs credentials left inside input/output URLs
pub(crate) const FUNNEL_SERVICE_NAME: &str = "Funnel";

/// Task id alphabet: ASCII uppercase letters followed by digits
pub(crate) const DEFAULT_TASK_ID_CHARSET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub(crate) const DEFAULT_TASK_ID_LENGTH: usize = 6;

/// Upper bound on a single DNS lookup during ranking
pub(crate) const DEFAULT_DNS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Mean earth radius used for great-circle distances
pub(crate) const EARTH_RADIUS_KM: f64 = 6371.0088;
