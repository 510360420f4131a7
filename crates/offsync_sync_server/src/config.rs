//! Server configuration.

/// Configuration for the sync server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Largest page the changes feed will return.
    pub max_page_size: u32,
    /// Page size used when the client does not ask for one.
    pub default_page_size: u32,
}

impl ServerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_page_size: 500,
            default_page_size: 100,
        }
    }

    /// Sets the maximum page size (at least one).
    pub fn with_max_page_size(mut self, size: u32) -> Self {
        self.max_page_size = size.max(1);
        self
    }

    /// Sets the default page size (at least one).
    pub fn with_default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = size.max(1);
        self
    }

    /// Clamps a requested page size to the configured bounds.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let config = ServerConfig::new().with_max_page_size(10);
        assert_eq!(config.page_size(Some(50)), 10);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(None), 10);
        assert_eq!(ServerConfig::default().page_size(None), 100);
    }
}
