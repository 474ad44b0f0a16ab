//! Authentication strategies for SSH connections.
//!
//! Each configured host authenticates with exactly one method, so a host resolves
//! to a single [`AuthStrategy`]:
//!
//! - [`PasswordAuth`]: password authentication
//! - [`KeyAuth`]: private key file authentication
//!
//! Strategies never log credential material; only the strategy name appears in
//! debug output.

mod key;
mod password;
mod traits;

pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;
