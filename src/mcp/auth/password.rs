//! Password-based SSH authentication.

use async_trait::async_trait;
use russh::client;

use crate::mcp::handler::SshClientHandler;
use crate::mcp::registry::Secret;

use super::traits::AuthStrategy;

/// Password authentication strategy.
pub struct PasswordAuth {
    password: Secret,
}

impl PasswordAuth {
    pub fn new(password: Secret) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String> {
        let result = handle
            .authenticate_password(username, self.password.expose())
            .await
            .map_err(|e| format!("Password authentication failed: {}", e))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_auth_name() {
        let auth = PasswordAuth::new(Secret::new("secret"));
        assert_eq!(auth.name(), "password");
    }

    #[test]
    fn test_password_kept_as_secret() {
        let auth = PasswordAuth::new(Secret::new("my-password"));
        assert_eq!(auth.password.expose(), "my-password");
        assert!(!format!("{:?}", auth.password).contains("my-password"));
    }
}
