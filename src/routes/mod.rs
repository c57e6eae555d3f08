/// Router Module Index
///
/// Routing is split by access level. Access control is attached per module
/// (via Axum layers in `create_router`), never per handler alone.

/// Routes open to anonymous clients: health, login/logout, password
/// recovery and the cached read endpoints.
pub mod public;

/// Routes behind the request gate. Any valid session token is enough.
pub mod authenticated;

/// Routes behind the request gate whose handlers also require the
/// `admin` role.
pub mod admin;
