//! Env-based configuration with best-effort `.env` loading.

/// Load environment variables from a `.env` file near the working directory.
/// Existing variables are never overridden.
pub fn load_dotenv() {
    for path in [".env", "../.env", "../../.env"] {
        if let Ok(content) = std::fs::read_to_string(path) {
            parse_env_file(&content);
        }
    }
}

fn parse_env_file(content: &str) {
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = parse_key_value(trimmed) {
            if std::env::var(&key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }
}

fn parse_key_value(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(2, '=');
    let key = parts.next()?.trim();
    if key.is_empty() {
        return None;
    }
    let value = parts.next()?.trim().trim_matches('"').trim_matches('\'');
    Some((key.to_string(), value.to_string()))
}

pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_parsing() {
        assert_eq!(
            parse_key_value("TELLER_STOCK=ok"),
            Some(("TELLER_STOCK".into(), "ok".into()))
        );
        assert_eq!(
            parse_key_value("URL=\"http://x/query\""),
            Some(("URL".into(), "http://x/query".into()))
        );
        assert_eq!(parse_key_value("=oops"), None);
    }
}
