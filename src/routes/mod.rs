/// Router Module Index
///
/// Splits the API by access level. Access control is attached per module in
/// `create_router`, so a handler cannot end up on a less protected router by accident.

/// Routes open to anonymous visitors. Handlers that read posts scope the result to the
/// caller themselves.
pub mod public;

/// Routes behind the session check.
pub mod authenticated;

/// Account management. Requires a session; the admin role is checked in the handlers.
pub mod admin;

/// The static public blog and the login-guarded admin dashboard.
pub mod site;
