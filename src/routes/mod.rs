/// Router Module Index
///
/// Routes are split by how the caller must present itself. Which operations a
/// principal may perform is decided by the policy layer, not by the router.

/// Routes reachable without a principal.
pub mod public;

/// Routes behind the `AuthUser` middleware.
pub mod authenticated;

/// Account administration, nested under `/admin` and also behind `AuthUser`.
pub mod admin;
