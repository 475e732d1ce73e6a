use super::connection::Connection;

/// Case-insensitive substring match on the application name. An empty query
/// matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppNameFilter {
    needle: String,
}

impl AppNameFilter {
    pub fn new(query: &str) -> Self {
        Self {
            needle: query.to_lowercase(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    pub fn matches(&self, conn: &Connection) -> bool {
        self.is_empty() || conn.app_name.to_lowercase().contains(&self.needle)
    }
}
