//! Shared fixtures for the Fanout benchmarks.

use fanout_core::{Registry, RegistryConfig, Subscription};

/// Create a registry with `count` subscribers on `topic`.
#[must_use]
pub fn registry_with_subscribers(
    topic: &str,
    count: usize,
    config: RegistryConfig,
) -> (Registry, Vec<Subscription>) {
    let registry = Registry::with_config(config);
    let subs = (0..count).map(|_| registry.subscribe(topic)).collect();
    (registry, subs)
}

/// Receive everything currently buffered. Returns the number of messages.
pub fn drain(subs: &mut [Subscription]) -> usize {
    let mut received = 0;
    for sub in subs {
        while sub.try_recv().is_ok() {
            received += 1;
        }
    }
    received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_delivers_to_all() {
        let (registry, mut subs) = registry_with_subscribers("t", 3, RegistryConfig::default());
        registry.publish("t", "x");
        registry.publish("t", "y");
        assert_eq!(drain(&mut subs), 6);
        assert_eq!(drain(&mut subs), 0);
    }
}
