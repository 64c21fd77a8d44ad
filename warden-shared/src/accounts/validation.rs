//! Email and username shape checks

/// Usernames that can never be claimed, compared lowercased
pub const RESERVED_USERNAMES: &[&str] = &[
    "about", "abuse", "account", "accounts", "admin", "administrator", "anonymous", "api", "app",
    "auth", "billing", "blog", "contact", "dashboard", "default", "dev", "docs", "email", "help",
    "home", "info", "login", "logout", "mail", "me", "moderator", "new", "news", "noreply",
    "no-reply", "null", "own", "owner", "password", "postmaster", "privacy", "profile", "register",
    "root", "security", "settings", "signin", "signup", "staff", "status", "support", "system",
    "terms", "test", "undefined", "user", "users", "webhook", "webhooks", "webmaster", "www",
    "yourself",
];

const USERNAME_MIN_LENGTH: usize = 3;
const USERNAME_MAX_LENGTH: usize = 20;

/// Lowercased and trimmed
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// `local@domain.tld`: one `@`, no whitespace, a dot inside the domain
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') {
        return false;
    }

    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// 3 to 20 ASCII letters, digits and single inner hyphens
pub fn is_valid_username(username: &str) -> bool {
    let length = username.chars().count();
    if !(USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&length) {
        return false;
    }

    if username.starts_with('-') || username.ends_with('-') || username.contains("--") {
        return false;
    }

    username.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// The handle: ASCII letters and digits only, lowercased
pub fn normalize_username(username: &str) -> String {
    username
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
