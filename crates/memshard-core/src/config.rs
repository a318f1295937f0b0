#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Number of change entries retained per session; older ones are evicted.
    pub change_feed_limit: usize,
    /// Page size used when a change listing does not ask for one.
    pub list_limit_default: usize,
    /// Upper clamp for change listing page size.
    pub list_limit_max: usize,
    /// History entries kept inside the momentum shard payload.
    pub momentum_history_limit: usize,
    pub momentum: MomentumDefaults,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            change_feed_limit: 100,
            list_limit_default: 50,
            list_limit_max: 200,
            momentum_history_limit: 20,
            momentum: MomentumDefaults::default(),
        }
    }
}

/// Seed values for a fresh momentum shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MomentumDefaults {
    pub current: i64,
    pub floor: i64,
    pub ceiling: i64,
}

impl Default for MomentumDefaults {
    fn default() -> Self {
        Self {
            current: 0,
            floor: -2,
            ceiling: 3,
        }
    }
}

impl StoreConfig {
    /// Defaults overlaid with `MEMSHARD_*` environment variables. Malformed
    /// values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(limit) = env_usize("MEMSHARD_CHANGE_FEED_LIMIT") {
            cfg.change_feed_limit = limit.max(1);
        }
        if let Some(max) = env_usize("MEMSHARD_LIST_LIMIT_MAX") {
            cfg.list_limit_max = max.max(1);
        }
        if let Some(limit) = env_usize("MEMSHARD_MOMENTUM_HISTORY_LIMIT") {
            cfg.momentum_history_limit = limit;
        }
        if let Some(floor) = env_i64("MEMSHARD_MOMENTUM_FLOOR") {
            cfg.momentum.floor = floor;
        }
        if let Some(ceiling) = env_i64("MEMSHARD_MOMENTUM_CEILING") {
            cfg.momentum.ceiling = ceiling;
        }
        cfg.normalized()
    }

    /// Restores ordering constraints between related knobs.
    pub fn normalized(mut self) -> Self {
        self.change_feed_limit = self.change_feed_limit.max(1);
        self.list_limit_max = self.list_limit_max.max(1);
        self.list_limit_default = self.list_limit_default.clamp(1, self.list_limit_max);
        if self.momentum.floor > self.momentum.ceiling {
            std::mem::swap(&mut self.momentum.floor, &mut self.momentum.ceiling);
        }
        self.momentum.current = self
            .momentum
            .current
            .clamp(self.momentum.floor, self.momentum.ceiling);
        self
    }

    /// Clamps a requested page size into `1..=list_limit_max`.
    pub fn clamp_list_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.list_limit_default)
            .clamp(1, self.list_limit_max)
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_limit_is_clamped() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.clamp_list_limit(None), 50);
        assert_eq!(cfg.clamp_list_limit(Some(0)), 1);
        assert_eq!(cfg.clamp_list_limit(Some(10_000)), 200);
    }

    #[test]
    fn normalized_repairs_inverted_bounds() {
        let cfg = StoreConfig {
            momentum: MomentumDefaults {
                current: 9,
                floor: 4,
                ceiling: -1,
            },
            ..StoreConfig::default()
        }
        .normalized();
        assert_eq!(cfg.momentum.floor, -1);
        assert_eq!(cfg.momentum.ceiling, 4);
        assert_eq!(cfg.momentum.current, 4);
    }
}
