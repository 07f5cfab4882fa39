// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across sandrelay

// Server Configuration
pub const PORT: &str = "PORT";

// Sandbox Provider Credentials
pub const DAYTONA_API_KEY: &str = "DAYTONA_API_KEY";
pub const DAYTONA_BASE_URL: &str = "DAYTONA_BASE_URL";

// Secrets forwarded into newly created sandboxes (comma-separated variable names)
pub const SANDBOX_FORWARD_ENV: &str = "SANDBOX_FORWARD_ENV";

// Sandbox Lifecycle
pub const SANDBOX_START_TIMEOUT_SECS: &str = "SANDBOX_START_TIMEOUT_SECS";

// Worker Process
pub const WORKER_PORT: &str = "WORKER_PORT";
pub const STREAM_BUNDLE_PATH: &str = "STREAM_BUNDLE_PATH";
pub const ONESHOT_BUNDLE_PATH: &str = "ONESHOT_BUNDLE_PATH";

// Health Checking
pub const HEALTH_CHECK_MAX_ATTEMPTS: &str = "HEALTH_CHECK_MAX_ATTEMPTS";
pub const HEALTH_CHECK_BASE_DELAY_MS: &str = "HEALTH_CHECK_BASE_DELAY_MS";

// Bundle Builder
pub const ESBUILD_PATH: &str = "ESBUILD_PATH";
