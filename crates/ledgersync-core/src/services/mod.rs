//! Long-lived handles shared across clients.

mod tenant;

pub use tenant::TenantSession;
