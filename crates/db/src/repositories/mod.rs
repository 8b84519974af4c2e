//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept a PostgreSQL pool or executor as the first argument.

pub mod session_repo;
pub mod tenant_repo;
pub mod user_repo;

pub use session_repo::SessionRepo;
pub use tenant_repo::TenantRepo;
pub use user_repo::UserRepo;
