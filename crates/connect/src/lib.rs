//! HTTP integrations for the fleet dashboard: a retry-capable API client
//! with path-candidate fallback, typed clients for the device management
//! platform and the project tracker, and the OAuth transport used by the
//! token store.

mod client;
mod devices;
mod error;
mod oauth;
mod tasks;
mod token;

pub use client::{ApiClient, RequestOptions, DEFAULT_MAX_RETRIES};
pub use devices::DevicePlatformClient;
pub use error::{ApiRetryClass, ConnectError, Result};
pub use oauth::OAuthHttpTransport;
pub use tasks::TaskTrackerClient;
pub use token::{AccessTokenProvider, StaticTokenProvider, StoredTokenProvider};
