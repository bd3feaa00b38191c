//! Per-provider credential pools.
//!
//! Keys come from `<PREFIX>_API_KEY`, `<PREFIX>_API_KEY_2`, ... in declared
//! order, read once at startup and immutable afterwards. Trial `i` of a task
//! uses key `i % key_count`; failures never evict a key.

use std::collections::HashMap;

use tracing::info;

use crate::models::{Vendor, ALL_VENDORS};

#[derive(Debug, Clone, Default)]
pub struct KeyPool {
    keys: HashMap<Vendor, Vec<String>>,
}

impl KeyPool {
    pub fn from_env() -> Self {
        let mut keys: HashMap<Vendor, Vec<String>> = HashMap::new();
        for vendor in ALL_VENDORS {
            let mut pool = Vec::new();
            for prefix in vendor.env_prefixes() {
                push_key(&mut pool, &format!("{prefix}_API_KEY"));
                let mut n = 2;
                loop {
                    let name = format!("{prefix}_API_KEY_{n}");
                    if !push_key(&mut pool, &name) {
                        break;
                    }
                    n += 1;
                }
            }
            if !pool.is_empty() {
                info!("{}: {} key(s) configured", vendor.as_str(), pool.len());
                keys.insert(*vendor, pool);
            }
        }
        Self { keys }
    }

    /// Pool with explicit keys; test seam.
    pub fn with_keys(keys: HashMap<Vendor, Vec<String>>) -> Self {
        Self { keys }
    }

    pub fn has_keys(&self, vendor: Vendor) -> bool {
        self.keys.get(&vendor).map_or(false, |k| !k.is_empty())
    }

    pub fn key_count(&self, vendor: Vendor) -> usize {
        self.keys.get(&vendor).map_or(0, Vec::len)
    }

    /// Key for trial `i`, rotating through the pool in declared order.
    pub fn key_for_trial(&self, vendor: Vendor, trial: usize) -> Option<&str> {
        let pool = self.keys.get(&vendor)?;
        if pool.is_empty() {
            return None;
        }
        Some(pool[trial % pool.len()].as_str())
    }
}

fn push_key(pool: &mut Vec<String>, var: &str) -> bool {
    match std::env::var(var) {
        Ok(value) => {
            let value = value.trim().to_string();
            if !value.is_empty() && !pool.contains(&value) {
                pool.push(value);
            }
            true
        }
        Err(_) => false,
    }
}
