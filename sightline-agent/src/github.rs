//! GitHub sign-in for the `github_login` tool: form selectors and
//! two-factor codes.
use totp_rs::{Algorithm, Secret, TOTP};

pub const GITHUB_LOGIN_URL: &str = "https://github.com/login";

pub const LOGIN_FIELD: &str = "#login_field";
pub const PASSWORD_FIELD: &str = "#password";
/// Authenticator-app field; older pages call it `otp`.
pub const OTP_FIELD: &str = "#app_totp, #otp";

fn totp_for(username: &str, secret_b32: &str) -> Result<TOTP, String> {
    let bytes = Secret::Encoded(secret_b32.trim().replace(' ', "").to_uppercase())
        .to_bytes()
        .map_err(|e| format!("invalid TOTP secret: {e:?}"))?;
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        Some("GitHub".to_string()),
        username.replace(':', "_"),
    )
    .map_err(|e| format!("invalid TOTP parameters: {e}"))
}

/// Six-digit code valid at unix time `at`.
pub fn code_at(username: &str, secret_b32: &str, at: u64) -> Result<String, String> {
    Ok(totp_for(username, secret_b32)?.generate(at))
}

pub fn current_code(username: &str, secret_b32: &str) -> Result<String, String> {
    totp_for(username, secret_b32)?
        .generate_current()
        .map_err(|e| format!("system clock error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 SHA1 secret "12345678901234567890" in base32.
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn matches_rfc_vectors() {
        assert_eq!(code_at("octocat", RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(code_at("octocat", RFC_SECRET, 1_111_111_109).unwrap(), "081804");
    }

    #[test]
    fn accepts_spaced_lowercase_secrets() {
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(code_at("octocat", spaced, 59).unwrap(), "287082");
        assert_eq!(current_code("octocat", RFC_SECRET).unwrap().len(), 6);
    }

    #[test]
    fn rejects_garbage_secrets() {
        assert!(code_at("octocat", "not base32!", 59).is_err());
    }
}
