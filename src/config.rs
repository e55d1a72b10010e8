/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Identity of this server instance; stamped on every ledger entry so
    /// replication consumers can filter out their own changes.
    pub server: String,
    /// Global weight budget for the parent-association cache. Weight is the
    /// number of parent entries held per cached node (minimum 1).
    pub parent_assocs_cache_weight: usize,
    /// Truncation length of the case-insensitive child-name key prefix.
    pub child_name_key_len: usize,
    /// Upper bound on ancestor-walk length before a cycle check fails loudly.
    pub cycle_check_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            server: "local".to_string(),
            parent_assocs_cache_weight: 100_000,
            child_name_key_len: 50,
            cycle_check_limit: 100_000,
        }
    }
}

impl StoreConfig {
    /// Small cache footprint for embedded or test use.
    pub fn compact() -> Self {
        Self {
            parent_assocs_cache_weight: 1_000,
            ..Self::default()
        }
    }

    /// Large cache budget for read-heavy deployments with hot fan-in nodes.
    pub fn read_heavy() -> Self {
        Self {
            parent_assocs_cache_weight: 1_000_000,
            ..Self::default()
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_only_in_cache_budget() {
        let d = StoreConfig::default();
        let c = StoreConfig::compact();
        assert!(c.parent_assocs_cache_weight < d.parent_assocs_cache_weight);
        assert_eq!(c.child_name_key_len, d.child_name_key_len);
    }
}
