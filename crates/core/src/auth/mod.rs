//! OAuth token lifecycle for the external provider integrations.
//!
//! One [`TokenService`] per provider owns the authorization-code flow (with
//! PKCE), the persisted token records, and refresh. Refreshes are serialized
//! per user through the advisory lock manager so two instances can never
//! burn the same single-use refresh token.

mod model;
mod repository;
mod service;

pub use model::{
    AuthError, AuthorizationRequest, ProviderSettings, TokenRecord, TokenResponse, TransportError,
};
pub use repository::{OAuthTransport, TokenRepository};
pub use service::{TokenService, EXPIRY_SAFETY_MARGIN_SECS, PENDING_STATE_TTL_SECS};

#[cfg(test)]
mod tests;
