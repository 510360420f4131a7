//! Local store configuration.

/// Configuration for the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Flush the record log after every frame.
    pub sync_on_write: bool,
    /// Number of stripes in the per-record lock table.
    pub lock_stripes: usize,
}

impl StoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            sync_on_write: true,
            lock_stripes: 64,
        }
    }

    /// Sets whether every frame is flushed.
    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Sets the number of lock stripes (at least one).
    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes.max(1);
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = StoreConfig::new()
            .with_sync_on_write(false)
            .with_lock_stripes(0);
        assert!(!config.sync_on_write);
        assert_eq!(config.lock_stripes, 1);
    }
}
