//! Deterministic randomized testing of the B-tree.
//!
//! A seeded `Simulator` drives a `BTree<MemoryStore>` with random inserts,
//! updates, deletes, lookups and range scans, mirroring each one on a
//! `std::collections::BTreeMap` model. After every step it checks:
//!
//! 1. `verify()` accepts the tree
//! 2. the tree holds exactly the model's entries
//! 3. every live page belongs to the tree (nothing leaked)
//!
//! Allocation faults can be injected; a failed operation must leave both the
//! tree and the page population unchanged. Given the same seed, a run is
//! identical.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::btree::{BTree, BTreeError, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::config::TreeConfig;
use crate::storage::MemoryStore;

/// Configuration for a simulation run.
#[derive(Debug, Clone, Copy)]
pub struct SimulatorConfig {
    pub seed: u64,
    /// Number of distinct keys the workload draws from.
    pub key_space: u32,
    /// Longest value generated, besides the occasional maximal one.
    pub max_value_len: usize,
    /// Probability that a step deletes instead of inserting.
    pub delete_rate: f64,
    /// Probability that a mutation runs with an allocation fault armed.
    pub fault_rate: f64,
    pub tree: TreeConfig,
}

impl SimulatorConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            key_space: 400,
            max_value_len: 200,
            delete_rate: 0.3,
            fault_rate: 0.0,
            tree: TreeConfig::default(),
        }
    }

    pub const fn with_key_space(mut self, key_space: u32) -> Self {
        self.key_space = key_space;
        self
    }

    pub const fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.max_value_len = max_value_len;
        self
    }

    pub const fn with_delete_rate(mut self, delete_rate: f64) -> Self {
        self.delete_rate = delete_rate;
        self
    }

    pub const fn with_fault_rate(mut self, fault_rate: f64) -> Self {
        self.fault_rate = fault_rate;
        self
    }

    pub const fn with_merge_threshold(mut self, merge_threshold: usize) -> Self {
        self.tree.merge_threshold = merge_threshold;
        self
    }
}

/// Counters from a simulation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimulationResult {
    pub inserts: u64,
    pub deletes: u64,
    pub lookups: u64,
    pub scans: u64,
    /// Mutations that failed on an injected fault.
    pub faulted: u64,
    /// Largest height seen.
    pub max_height: usize,
    pub final_root: u64,
    pub final_entries: usize,
}

pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    tree: BTree<MemoryStore>,
    model: BTreeMap<Vec<u8>, Vec<u8>>,
    result: SimulationResult,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(config.seed),
            tree: BTree::new(MemoryStore::new()).with_config(config.tree),
            model: BTreeMap::new(),
            result: SimulationResult::default(),
        }
    }

    /// Run `steps` random operations, checking the tree after each.
    pub fn run(&mut self, steps: usize) -> SimulationResult {
        for step in 0..steps {
            self.step();
            self.check(step);
        }
        self.result.final_root = self.tree.root();
        self.result.final_entries = self.model.len();
        self.result
    }

    /// Delete every key in the model, checking after each delete.
    pub fn drain(&mut self) {
        let keys: Vec<Vec<u8>> = self.model.keys().cloned().collect();
        for (step, key) in keys.iter().enumerate() {
            assert!(self.tree.delete(key).expect("drain delete"));
            self.model.remove(key);
            self.check(step);
        }
        assert!(self.tree.is_empty());
        assert_eq!(self.tree.store().live_pages(), 0);
    }

    /// Key for slot `n`. Lengths vary with the slot, and every fiftieth
    /// slot gets a long key.
    fn key(n: u32) -> Vec<u8> {
        let mut key = format!("key{n:06}").into_bytes();
        let pad = if n % 50 == 0 {
            MAX_KEY_SIZE - key.len()
        } else {
            (n as usize * 7919) % 40
        };
        key.resize(key.len() + pad, b'.');
        key
    }

    fn value(&mut self) -> Vec<u8> {
        let len = if self.rng.random_bool(0.02) {
            MAX_VALUE_SIZE
        } else {
            self.rng.random_range(0..=self.config.max_value_len)
        };
        let byte: u8 = self.rng.random();
        vec![byte; len]
    }

    fn arm_fault(&mut self) -> bool {
        if self.config.fault_rate > 0.0 && self.rng.random_bool(self.config.fault_rate) {
            let budget = self.rng.random_range(0..4);
            self.tree.store_mut().fail_allocations_after(budget);
            return true;
        }
        false
    }

    fn step(&mut self) {
        let key = Self::key(self.rng.random_range(0..self.config.key_space));

        match self.rng.random_range(0..10u32) {
            0 => {
                self.result.lookups += 1;
                let found = self.tree.get(&key).expect("get");
                assert_eq!(found.as_ref(), self.model.get(&key));
            }
            1 => {
                self.result.scans += 1;
                self.check_scan_from(&key);
            }
            _ if self.rng.random_bool(self.config.delete_rate) => {
                self.result.deletes += 1;
                let armed = self.arm_fault();
                let outcome = self.tree.delete(&key);
                self.tree.store_mut().clear_fault();
                match outcome {
                    Ok(deleted) => {
                        assert_eq!(deleted, self.model.remove(&key).is_some());
                    }
                    Err(BTreeError::Store(_)) if armed => self.result.faulted += 1,
                    Err(e) => panic!("delete failed: {e}"),
                }
            }
            _ => {
                self.result.inserts += 1;
                let value = self.value();
                let armed = self.arm_fault();
                let outcome = self.tree.insert(&key, &value);
                self.tree.store_mut().clear_fault();
                match outcome {
                    Ok(()) => {
                        self.model.insert(key, value);
                    }
                    Err(BTreeError::Store(_)) if armed => self.result.faulted += 1,
                    Err(e) => panic!("insert failed: {e}"),
                }
            }
        }
    }

    fn check(&mut self, step: usize) {
        let stats = self
            .tree
            .verify()
            .unwrap_or_else(|e| panic!("step {step}: {e}"));
        assert_eq!(stats.entries, self.model.len(), "step {step}: entry count");
        assert_eq!(
            self.tree.store().live_pages(),
            stats.internal_pages + stats.leaf_pages,
            "step {step}: leaked pages"
        );
        self.result.max_height = self.result.max_height.max(stats.height);
    }

    fn check_scan_from(&mut self, start: &[u8]) {
        let expected: Vec<(Vec<u8>, Vec<u8>)> = self
            .model
            .range(start.to_vec()..)
            .take(20)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut iter = self.tree.iter_from(start).expect("iter_from");
        let mut actual = Vec::new();
        while actual.len() < 20 {
            match iter.next_entry().expect("next_entry") {
                Some(entry) => actual.push(entry),
                None => break,
            }
        }
        assert_eq!(actual, expected);
    }

    /// Compare the full contents of the tree with the model.
    pub fn assert_matches_model(&mut self) {
        let actual: Vec<(Vec<u8>, Vec<u8>)> = self
            .tree
            .iter()
            .expect("iter")
            .collect::<Result<_, _>>()
            .expect("iterate");
        let expected: Vec<(Vec<u8>, Vec<u8>)> = self
            .model
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        assert_eq!(actual, expected);
    }
}

#[test]
fn test_random_workload() {
    for seed in [1, 7, 42] {
        let mut sim = Simulator::new(SimulatorConfig::new(seed));
        let result = sim.run(1500);
        sim.assert_matches_model();

        assert!(result.max_height >= 2, "seed {seed}: tree never grew");
        assert!(result.deletes > 0);
        assert_eq!(result.faulted, 0);
    }
}

#[test]
fn test_same_seed_same_run() {
    let config = SimulatorConfig::new(99).with_fault_rate(0.1);
    let first = Simulator::new(config).run(500);
    let second = Simulator::new(config).run(500);
    assert_eq!(first, second);
}

#[test]
fn test_large_values_force_deep_splits() {
    let config = SimulatorConfig::new(5)
        .with_key_space(150)
        .with_max_value_len(MAX_VALUE_SIZE)
        .with_delete_rate(0.2);
    let mut sim = Simulator::new(config);
    let result = sim.run(800);
    sim.assert_matches_model();
    assert!(result.max_height >= 2);
}

#[test]
fn test_injected_faults_roll_back() {
    let config = SimulatorConfig::new(11).with_fault_rate(0.2);
    let mut sim = Simulator::new(config);
    let result = sim.run(1000);
    sim.assert_matches_model();
    assert!(result.faulted > 0);
}

#[test]
fn test_merge_thresholds() {
    for threshold in [1, 512, 2048, 4096] {
        let config = SimulatorConfig::new(u64::try_from(threshold).unwrap_or(0))
            .with_merge_threshold(threshold)
            .with_delete_rate(0.5);
        let mut sim = Simulator::new(config);
        sim.run(800);
        sim.assert_matches_model();
        sim.drain();
    }
}

#[test]
fn test_fill_then_drain() {
    let config = SimulatorConfig::new(3).with_delete_rate(0.0);
    let mut sim = Simulator::new(config);
    let result = sim.run(600);
    assert!(result.final_entries > 200);
    sim.drain();
}
