use crate::error::{AntispamError, Result};

/// Basic email validation
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(AntispamError::InvalidEntry("Email is empty".to_string()));
    }

    if !email.contains('@') {
        return Err(AntispamError::InvalidEntry(
            "Email must contain @".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(AntispamError::InvalidEntry("Invalid email format".to_string()));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || local.chars().any(char::is_whitespace) {
        return Err(AntispamError::InvalidEntry(
            "Email local part must be non-empty and contain no whitespace".to_string(),
        ));
    }

    validate_domain(domain)
}

/// Hostname-style domain validation (`example.co.uk`)
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(AntispamError::InvalidEntry("Domain is empty".to_string()));
    }

    if !domain.contains('.') {
        return Err(AntispamError::InvalidEntry(
            "Domain must contain a dot".to_string(),
        ));
    }

    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(AntispamError::InvalidEntry(format!(
                "Invalid domain label in {:?}",
                domain
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(AntispamError::InvalidEntry(format!(
                "Domain label may not start or end with '-': {:?}",
                domain
            )));
        }
        if !label.chars().all(|c| c.is_alphanumeric() || c == '-') {
            return Err(AntispamError::InvalidEntry(format!(
                "Invalid character in domain {:?}",
                domain
            )));
        }
    }

    Ok(())
}

/// Domain part of a syntactically valid address
pub fn email_domain(email: &str) -> Option<&str> {
    validate_email(email).ok()?;
    email.rsplit_once('@').map(|(_, domain)| domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_email() {
        assert!(validate_email("test@example.com").is_ok());
        assert!(validate_email("user.name@example.co.uk").is_ok());
    }

    #[test]
    fn test_invalid_email() {
        assert!(validate_email("").is_err());
        assert!(validate_email("test").is_err());
        assert!(validate_email("test@").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("test@domain").is_err());
        assert!(validate_email("a b@example.com").is_err());
        assert!(validate_email("a@b@example.com").is_err());
    }

    #[test]
    fn test_validate_domain() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("mail-relay.example.org").is_ok());
        assert!(validate_domain("example").is_err());
        assert!(validate_domain("-bad.example.com").is_err());
        assert!(validate_domain("bad..example.com").is_err());
        assert!(validate_domain("exa mple.com").is_err());
    }

    #[test]
    fn test_email_domain() {
        assert_eq!(email_domain("someone@spam.example"), Some("spam.example"));
        assert_eq!(email_domain("not-an-email"), None);
    }
}
