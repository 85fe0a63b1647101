//! stack::role
//!
//! Classification of containers and compose services by role.
//!
//! All name heuristics live in [`ContainerRole::classify`]. Callers pass the
//! service part of a container name (see [`service_of_container`]) so the
//! project prefix cannot skew the result.

use serde::Serialize;

/// What a container does within a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRole {
    /// The application server users browse to.
    Primary,
    Database,
    /// Database admin UI (phpMyAdmin, Adminer).
    AdminUi,
    /// Supporting services: mail catchers, caches, CLI sidecars.
    Auxiliary,
    Unknown,
}

const ADMIN_UI: &[&str] = &["phpmyadmin", "adminer", "pma"];
const AUXILIARY: &[&str] = &[
    "cli", "mail", "smtp", "redis", "memcache", "cron", "queue", "elasticsearch",
];
const DATABASE: &[&str] = &["mysql", "mariadb", "postgres", "database", "db"];
const PRIMARY: &[&str] = &["wordpress", "wp", "web", "app", "nginx", "apache", "php", "site"];

impl ContainerRole {
    /// Classify a service or container name.
    ///
    /// # Example
    ///
    /// ```
    /// use wpspin::stack::role::ContainerRole;
    ///
    /// assert_eq!(ContainerRole::classify("wordpress"), ContainerRole::Primary);
    /// assert_eq!(ContainerRole::classify("db"), ContainerRole::Database);
    /// assert_eq!(ContainerRole::classify("phpmyadmin"), ContainerRole::AdminUi);
    /// assert_eq!(ContainerRole::classify("wp-cli"), ContainerRole::Auxiliary);
    /// assert_eq!(ContainerRole::classify("grafana"), ContainerRole::Unknown);
    /// ```
    pub fn classify(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

        // Order matters: "wp-cli" is auxiliary, not primary.
        if has(ADMIN_UI) {
            ContainerRole::AdminUi
        } else if has(AUXILIARY) {
            ContainerRole::Auxiliary
        } else if has(DATABASE) {
            ContainerRole::Database
        } else if has(PRIMARY) {
            ContainerRole::Primary
        } else {
            ContainerRole::Unknown
        }
    }

    /// Short label for tables.
    pub fn label(self) -> &'static str {
        match self {
            ContainerRole::Primary => "app",
            ContainerRole::Database => "database",
            ContainerRole::AdminUi => "admin",
            ContainerRole::Auxiliary => "aux",
            ContainerRole::Unknown => "unknown",
        }
    }
}

/// Strip the compose project prefix and replica suffix from a container
/// name: `blog-wordpress-1` and `blog_wordpress_1` both yield `wordpress`.
///
/// Names that do not follow the convention are returned unchanged.
pub fn service_of_container<'n>(project: &str, container: &'n str) -> &'n str {
    let rest = container
        .strip_prefix(project)
        .and_then(|r| r.strip_prefix('-').or_else(|| r.strip_prefix('_')));
    let Some(rest) = rest else {
        return container;
    };
    match rest.rsplit_once(|c: char| c == '-' || c == '_') {
        Some((service, replica)) if replica.chars().all(|c| c.is_ascii_digit()) => service,
        _ => rest,
    }
}
