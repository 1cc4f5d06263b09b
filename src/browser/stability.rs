use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::browser::driver::{PageDriver, PageInfo, ProtocolError};

#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub max_wait_ms: u64,
    pub check_interval_ms: u64,
    pub min_stable_checks: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: 2000,
            check_interval_ms: 100,
            min_stable_checks: 2,
        }
    }
}

/// Tracks consecutive identical DOM fingerprints.
pub struct DomStabilityDetector {
    config: StabilityConfig,
    last_hash: Option<u64>,
    stable_count: usize,
}

impl DomStabilityDetector {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            last_hash: None,
            stable_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_hash = None;
        self.stable_count = 0;
    }

    pub fn fingerprint(info: &PageInfo) -> u64 {
        let mut hasher = DefaultHasher::new();
        info.url.hash(&mut hasher);
        info.ready_state.hash(&mut hasher);
        info.node_count.hash(&mut hasher);
        info.text_length.hash(&mut hasher);
        hasher.finish()
    }

    pub fn observe(&mut self, info: &PageInfo) -> bool {
        let current = Self::fingerprint(info);
        if let Some(last) = self.last_hash {
            if current == last {
                self.stable_count += 1;
            } else {
                self.stable_count = 0;
            }
        }
        self.last_hash = Some(current);
        self.stable_count >= self.config.min_stable_checks
    }
}

/// Polls the page until its fingerprint stops changing or `max_wait_ms`
/// elapses. `Ok(false)` on timeout; the caller proceeds either way.
pub async fn wait_for_dom_stability(
    driver: &dyn PageDriver,
    config: &StabilityConfig,
) -> Result<bool, ProtocolError> {
    let mut detector = DomStabilityDetector::new(config.clone());
    let start = tokio::time::Instant::now();
    let max_wait = Duration::from_millis(config.max_wait_ms);

    while start.elapsed() < max_wait {
        let info = driver.page_info().await?;
        if detector.observe(&info) {
            tracing::debug!(elapsed = ?start.elapsed(), "DOM stable");
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(config.check_interval_ms)).await;
    }

    tracing::debug!(elapsed = ?start.elapsed(), "DOM stability wait timed out");
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    fn info(nodes: u64) -> PageInfo {
        PageInfo {
            url: "https://a.test/".into(),
            title: "A".into(),
            ready_state: "complete".into(),
            node_count: nodes,
            text_length: 10,
        }
    }

    #[test]
    fn needs_consecutive_identical_observations() {
        let mut d = DomStabilityDetector::new(StabilityConfig {
            min_stable_checks: 2,
            ..Default::default()
        });
        assert!(!d.observe(&info(5)));
        assert!(!d.observe(&info(5)));
        assert!(!d.observe(&info(6)));
        assert!(!d.observe(&info(6)));
        assert!(d.observe(&info(6)));
        d.reset();
        assert!(!d.observe(&info(6)));
    }

    #[tokio::test]
    async fn static_page_settles() {
        let page = FakePage::new("https://a.test/", "A");
        let cfg = StabilityConfig {
            max_wait_ms: 1000,
            check_interval_ms: 1,
            min_stable_checks: 2,
        };
        assert!(wait_for_dom_stability(&page, &cfg).await.unwrap());
    }
}
