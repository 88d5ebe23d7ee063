use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error-protes-config-1 Required environment variable not set: {var_name}")]
    EnvVarRequired { var_name: String },

    #[error("error-protes-config-2 Version not available")]
    VersionNotAvailable,

    #[error("error-protes-config-3 Invalid port number: {port}")]
    InvalidPortNumber { port: String },

    #[error("error-protes-config-4 Invalid value for {name}: {details}")]
    InvalidValue { name: String, details: String },

    #[error("error-protes-config-5 Invalid timeout value: {value}")]
    InvalidTimeout { value: String },

    #[error("error-protes-config-6 Invalid TES service URL: {url}: {details}")]
    InvalidServiceUrl { url: String, details: String },

    #[error("error-protes-config-7 Unable to read service info file {path}: {details}")]
    ServiceInfoUnreadable { path: String, details: String },

    #[error("error-protes-config-8 {setting} is 'redis' but REDIS_URL is not set")]
    RedisUrlRequired { setting: String },
}

/// Errors raised by the ranking middlewares and the pipeline that runs them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MiddlewareError {
    #[error("error-protes-middleware-1 Middleware failed: {details}")]
    MiddlewareException { details: String },

    #[error("error-protes-middleware-2 Invalid middleware: {name}: {details}")]
    InvalidMiddleware { name: String, details: String },

    #[error("error-protes-middleware-3 Unable to resolve input URI host: {uri}: {details}")]
    InputUriError { uri: String, details: String },

    #[error("error-protes-middleware-4 Unable to resolve TES URI host: {uri}: {details}")]
    TesUriError { uri: String, details: String },

    #[error("error-protes-middleware-5 IP distance calculation failed: {details}")]
    IpDistanceCalculationError { details: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("error-protes-storage-1 Duplicate key: {key}")]
    DuplicateKey { key: String },

    #[error("error-protes-storage-2 Document not found: {worker_id}")]
    DocumentNotFound { worker_id: String },

    #[error("error-protes-storage-3 Document does not match expected schema: {details}")]
    SchemaMismatch { details: String },

    #[error("error-protes-storage-4 Invalid task state: {state}")]
    InvalidState { state: String },

    #[error("error-protes-storage-5 Invalid input data: {details}")]
    InvalidInput { details: String },

    #[error("error-protes-storage-6 Storage connection failed: {details}")]
    ConnectionFailed { details: String },

    #[error("error-protes-storage-7 Redis operation failed: {operation}: {source}")]
    RedisOperationFailed {
        operation: String,
        #[source]
        source: deadpool_redis::redis::RedisError,
    },

    #[error("error-protes-storage-8 Document kept changing during update: {worker_id}")]
    UpdateConflict { worker_id: String },
}

/// Failures talking to a backend TES instance.
#[derive(Debug, Error)]
pub enum TesClientError {
    #[error("error-protes-tes-1 Request to TES instance failed: {url}: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("error-protes-tes-2 TES instance returned status {status}: {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("error-protes-tes-3 Request to TES instance timed out after {timeout_ms}ms: {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("error-protes-tes-4 Invalid TES response from {url}: {details}")]
    InvalidResponse { url: String, details: String },

    #[error("error-protes-tes-5 Invalid TES URL: {url}: {details}")]
    InvalidUrl { url: String, details: String },
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("error-protes-task-1 Task request is malformed: {details}")]
    BadRequest { details: String },

    #[error("error-protes-task-2 Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("error-protes-task-3 No unique task identifier available after {attempts} attempts")]
    IdsUnavailable { attempts: u32 },

    #[error("error-protes-task-4 No TES instance accepted task {task_id}")]
    NoTesInstancesAvailable { task_id: String },

    #[error("error-protes-task-5 Task storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("error-protes-task-6 Task ranking failed: {0}")]
    Middleware(#[from] MiddlewareError),

    #[error("error-protes-task-7 Tracking job could not be enqueued: {details}")]
    EnqueueFailed { details: String },

    #[error("error-protes-task-8 Unknown view: {view}")]
    InvalidView { view: String },

    #[error("error-protes-task-9 Task submission aborted: {details}")]
    SubmissionAborted { details: String },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("error-protes-queue-1 MPSC queue operation failed: {operation}: {details}")]
    MpscOperationFailed { operation: String, details: String },

    #[error("error-protes-queue-2 Queue capacity exceeded: {queue_type}: {capacity}")]
    CapacityExceeded { queue_type: String, capacity: usize },

    #[error("error-protes-queue-3 Redis queue operation failed: {operation}: {source}")]
    RedisOperationFailed {
        operation: String,
        #[source]
        source: deadpool_redis::redis::RedisError,
    },

    #[error("error-protes-queue-4 Queue connection failed: {queue_type}: {details}")]
    ConnectionFailed { queue_type: String, details: String },
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("error-protes-auth-1 Authorization header missing: {header}")]
    MissingHeader { header: String },

    #[error("error-protes-auth-2 Authorization header malformed: {details}")]
    MalformedHeader { details: String },

    #[error("error-protes-auth-3 Token validation failed: {details}")]
    TokenValidationFailed { details: String },

    #[error("error-protes-auth-4 Required claim missing: {claim}")]
    MissingClaim { claim: String },
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("error-protes-http-1 Unhandled web error: {details}")]
    Unhandled { details: String },

    #[error("error-protes-http-2 Bad request: {details}")]
    BadRequest { details: String },

    #[error("error-protes-http-3 Unauthorized: {details}")]
    Unauthorized { details: String },

    #[error("error-protes-http-4 Forbidden: {details}")]
    Forbidden { details: String },

    #[error("error-protes-http-5 Resource not found: {details}")]
    NotFound { details: String },
}
