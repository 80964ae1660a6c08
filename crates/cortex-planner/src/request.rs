//! Request text and package name screening.
//!
//! Runs before any planner sees the request. A request never reaches a shell,
//! but metacharacters in it are still a strong sign of injected commands.

use crate::error::PlannerError;

const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '`', '$', '<', '>', '\\', '\n', '\r'];

const MAX_PACKAGE_NAME_LEN: usize = 128;

/// Refuse empty, oversized or shell-flavoured request text.
pub fn validate_request(request: &str, max_len: usize) -> Result<(), PlannerError> {
    if request.trim().is_empty() {
        return Err(PlannerError::InvalidRequest("request is empty".to_string()));
    }
    if request.len() > max_len {
        return Err(PlannerError::InvalidRequest(format!(
            "request is {} bytes, limit is {}",
            request.len(),
            max_len
        )));
    }
    if let Some(c) = request.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(PlannerError::InvalidRequest(format!(
            "request contains shell metacharacter {:?}",
            c
        )));
    }
    if let Some(c) = request.chars().find(|c| c.is_control() && *c != '\t') {
        return Err(PlannerError::InvalidRequest(format!(
            "request contains control character {:?}",
            c
        )));
    }
    Ok(())
}

/// Package names start alphanumeric and continue with `[A-Za-z0-9+._:-]`.
pub fn validate_package_name(name: &str) -> Result<(), PlannerError> {
    let mut chars = name.chars();
    let valid = name.len() <= MAX_PACKAGE_NAME_LEN
        && chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || "+._:-".contains(c));
    if valid {
        Ok(())
    } else {
        Err(PlannerError::InvalidPackageName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_request_passes() {
        assert!(validate_request("install nginx and curl", 1000).is_ok());
    }

    #[test]
    fn empty_request_is_refused() {
        assert!(matches!(
            validate_request("   ", 1000),
            Err(PlannerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn oversized_request_is_refused() {
        let request = "a".repeat(1001);
        assert!(validate_request(&request, 1000).is_err());
        assert!(validate_request(&request, 2000).is_ok());
    }

    #[test]
    fn metacharacters_are_refused() {
        for request in [
            "nginx; rm -rf /",
            "nginx && curl x",
            "nginx | sh",
            "$(reboot)",
            "`id`",
            "nginx > /etc/passwd",
            "nginx\nreboot",
        ] {
            assert!(validate_request(request, 1000).is_err(), "{request}");
        }
    }

    #[test]
    fn package_names() {
        for ok in ["nginx", "python3-dev", "libstdc++6", "g++", "foo.bar", "lib:amd64"] {
            assert!(validate_package_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "-rf", ".hidden", "a b", "../etc", "pkg/evil", "x=y"] {
            assert!(validate_package_name(bad).is_err(), "{bad}");
        }
    }
}
