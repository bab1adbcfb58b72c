/// Collection of registered services
pub const SERVICES_PATH: &str = "/v1/services";

/// Digest of the current service list
pub const SERVICES_HASH_PATH: &str = "/v1/services/hash";

/// Address resolution, takes `name` and `version` query parameters
pub const SERVICES_ADDRESS_PATH: &str = "/v1/services/address";

/// Last activity per service id
pub const LAST_ACTIVITY_PATH: &str = "/v1/services/last_activity";

/// One service addressed by its numeric id
pub const SERVICE_BY_ID_PATH: &str = "/v1/services/by-id/:id";

/// One service addressed by name and version
pub const SERVICE_PATH: &str = "/v1/services/:name/:version";
pub const SERVICE_START_PATH: &str = "/v1/services/:name/:version/start";
pub const SERVICE_STOP_PATH: &str = "/v1/services/:name/:version/stop";
pub const SERVICE_ACTIVITY_PATH: &str = "/v1/services/:name/:version/activity";
