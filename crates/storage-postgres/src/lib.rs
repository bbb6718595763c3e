//! Postgres persistence for the fleet dashboard: device and token
//! repositories, the guest session store fed by RADIUS accounting, and the
//! advisory-lock backend that coordinates sync across dashboard replicas.
//!
//! Every repository implements a trait from `fleetmon-core`, so the engines
//! never see a pool or a row type. One [`PostgresStore`] owns the pool and
//! hands out cheap clones to each repository.

mod db;
mod devices;
mod errors;
mod locks;
mod radius;
mod tokens;

#[cfg(test)]
mod test_support;

pub use db::PostgresStore;
pub use devices::PgDeviceRepository;
pub use errors::StorageError;
pub use locks::PgAdvisoryLockBackend;
pub use radius::{PgGuestSessionRepository, PgRadiusAccountingSource};
pub use tokens::PgTokenRepository;
