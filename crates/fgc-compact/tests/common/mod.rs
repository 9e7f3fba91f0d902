//! Shared fixtures for the integration tests
//!
//! A `HeapFixture` owns a small heap, a class table with one `node` class
//! (two reference fields and two payload words) and a root set, and can
//! place objects in chosen regions.

#![allow(dead_code)]

use fgc_compact::config::{CompactConfig, CompactionStyle, ForwardingMode};
use fgc_compact::object::identity_hash;
use fgc_compact::stats::CycleStats;
use fgc_compact::{ClassInfo, ClassTable, CompactionDriver, Heap, RootSet, TracingMarker};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeMap;

/// Payload -> payloads of the two children, for every reachable node
pub type GraphSnapshot = BTreeMap<usize, [Option<usize>; 2]>;

/// Regions of 64 words
pub const REGION_SHIFT: u32 = 6;

pub fn config(compact_headers: bool, forwarding: ForwardingMode) -> CompactConfig {
    CompactConfig {
        compact_headers,
        forwarding: Some(forwarding),
        region_size_shift: REGION_SHIFT,
        block_size_shift: 3,
        num_regions: 8,
        gc_threads: Some(4),
        regions_per_claim: 1,
        ..Default::default()
    }
}

pub fn serial_config() -> CompactConfig {
    CompactConfig {
        style: CompactionStyle::Serial,
        ..config(false, ForwardingMode::Header)
    }
}

/// Every forwarding encoding the header layout allows
pub fn modes(compact_headers: bool) -> Vec<ForwardingMode> {
    let mut modes = vec![
        ForwardingMode::Sliding,
        ForwardingMode::Hashed,
        ForwardingMode::Dense,
    ];
    if !compact_headers {
        modes.insert(0, ForwardingMode::Header);
    }
    modes
}

pub struct HeapFixture {
    pub config: CompactConfig,
    pub heap: Heap,
    pub classes: ClassTable,
    pub roots: RootSet,
    pub driver: CompactionDriver,
    pub node: u32,
}

impl HeapFixture {
    pub fn new(config: CompactConfig) -> Self {
        let heap = Heap::new(&config).expect("heap");
        let mut classes = ClassTable::new(config.compact_headers);
        let header = if config.compact_headers { 1 } else { 2 };
        let node = classes
            .register(ClassInfo::new("node", header + 4, &[header, header + 1]))
            .expect("node class");
        let driver = CompactionDriver::new(config.clone(), &heap).expect("driver");
        Self {
            config,
            heap,
            classes,
            roots: RootSet::new(),
            driver,
            node,
        }
    }

    fn header_words(&self) -> usize {
        if self.config.compact_headers {
            1
        } else {
            2
        }
    }

    /// Words per node
    pub fn node_words(&self) -> usize {
        self.header_words() + 4
    }

    /// A node in `region` carrying `payload`
    pub fn node_in(&self, region: usize, payload: usize) -> usize {
        let obj = self
            .classes
            .instantiate_in_region(&self.heap, region, self.node)
            .expect("room in region");
        self.set_payload(obj, payload);
        obj
    }

    pub fn set_payload(&self, obj: usize, payload: usize) {
        let memory = self.heap.memory();
        memory.store(obj + (self.header_words() + 2) * 8, payload);
        memory.store(obj + (self.header_words() + 3) * 8, !payload);
    }

    /// Payload of `obj`, checking its second copy
    pub fn payload(&self, obj: usize) -> usize {
        let memory = self.heap.memory();
        let payload = memory.load(obj + (self.header_words() + 2) * 8);
        assert_eq!(
            memory.load(obj + (self.header_words() + 3) * 8),
            !payload,
            "payload of {:#x} is torn",
            obj
        );
        payload
    }

    pub fn link(&self, from: usize, field: usize, to: usize) {
        self.classes.set_reference(&self.heap, from, field, to);
    }

    pub fn child(&self, obj: usize, field: usize) -> usize {
        self.classes.reference(&self.heap, obj, field)
    }

    pub fn hash(&self, obj: usize) -> u32 {
        identity_hash(&self.heap, &self.classes, obj)
    }

    pub fn collect(&mut self) -> CycleStats {
        self.driver
            .collect(&self.heap, &self.classes, &TracingMarker, &self.roots)
    }

    /// Words between the heap base and the highest top of a non-free region
    pub fn extent_words(&self) -> usize {
        let base = self.heap.layout().base();
        self.heap
            .regions()
            .iter()
            .filter(|r| !r.is_free())
            .map(|r| (r.top() - base) / 8)
            .max()
            .unwrap_or(0)
    }
}

// ============================================================================
// GRAPHS
// ============================================================================

impl HeapFixture {
    /// Fill `per_region` nodes into each of `regions`, wire them randomly and
    /// root roughly `root_ratio` of them
    ///
    /// Payloads are 1, 2, 3... in allocation order. Returns every node.
    pub fn random_graph(
        &self,
        rng: &mut StdRng,
        regions: std::ops::Range<usize>,
        per_region: usize,
        root_ratio: f64,
    ) -> Vec<usize> {
        let mut nodes = Vec::new();
        for region in regions {
            for _ in 0..per_region {
                nodes.push(self.node_in(region, nodes.len() + 1));
            }
        }
        for &node in &nodes {
            for field in 0..2 {
                if rng.gen_bool(0.6) {
                    let to = nodes[rng.gen_range(0..nodes.len())];
                    self.link(node, field, to);
                }
            }
            if rng.gen_bool(root_ratio) {
                self.roots.add(node);
            }
        }
        nodes
    }

    /// Reachable structure by payload, independent of addresses
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut seen = GraphSnapshot::new();
        let mut grey = Vec::new();
        self.roots.for_each(|root| {
            if root != 0 {
                grey.push(root);
            }
        });
        while let Some(obj) = grey.pop() {
            let payload = self.payload(obj);
            if seen.contains_key(&payload) {
                continue;
            }
            let mut children = [None; 2];
            for (field, child) in children.iter_mut().enumerate() {
                let to = self.child(obj, field);
                if to != 0 {
                    *child = Some(self.payload(to));
                    grey.push(to);
                }
            }
            seen.insert(payload, children);
        }
        seen
    }

    /// Payloads of the roots, in root order
    pub fn root_payloads(&self) -> Vec<usize> {
        let mut payloads = Vec::new();
        self.roots.for_each(|root| payloads.push(self.payload(root)));
        payloads
    }
}
