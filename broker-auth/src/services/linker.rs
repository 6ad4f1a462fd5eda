/// Builds the frontend links that carry tokens in emails and invites.
#[derive(Debug, Clone)]
pub struct Linker {
    base_url: String,
}

impl Linker {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn verify_email(&self, token: &str) -> String {
        format!("{}/verify-email?data={}", self.base_url, token)
    }

    pub fn reset_password(&self, token: &str) -> String {
        format!("{}/reset-password/confirm?token={}", self.base_url, token)
    }

    pub fn invite(&self, token: &str) -> String {
        format!("{}/users/invite?ref={}", self.base_url, token)
    }
}
