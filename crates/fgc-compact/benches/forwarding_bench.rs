//! Forwarding and Compaction Benchmarks
//!
//! Lookup cost of each forwarding encoding over an installed set of
//! forwardings, and whole cycles over a fragmented heap.
//! Run with: `cargo bench --package fgc-compact`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use fgc_compact::config::{CompactConfig, CompactionStyle, ForwardingMode};
use fgc_compact::{
    ClassInfo, ClassTable, CompactionDriver, Forwarding, Heap, RootSet, TracingMarker,
};

const REGION_SHIFT: u32 = 10;
const NUM_REGIONS: usize = 16;
const NODE_WORDS: usize = 8;

fn config(forwarding: ForwardingMode) -> CompactConfig {
    CompactConfig {
        forwarding: Some(forwarding),
        region_size_shift: REGION_SHIFT,
        num_regions: NUM_REGIONS,
        ..Default::default()
    }
}

fn node_class(classes: &mut ClassTable) -> u32 {
    classes
        .register(ClassInfo::new("node", NODE_WORDS, &[2, 3]))
        .unwrap()
}

/// Fill the upper half of the heap with nodes; returns them per region
fn fill_upper_half(heap: &Heap, classes: &ClassTable, node: u32) -> Vec<Vec<usize>> {
    let per_region = (1 << REGION_SHIFT) / NODE_WORDS;
    (NUM_REGIONS / 2..NUM_REGIONS)
        .map(|region| {
            (0..per_region)
                .map(|_| classes.instantiate_in_region(heap, region, node).unwrap())
                .collect()
        })
        .collect()
}

fn bench_forwardee_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("forwardee_lookup");

    for mode in [
        ForwardingMode::Header,
        ForwardingMode::Sliding,
        ForwardingMode::Hashed,
        ForwardingMode::Dense,
    ] {
        let config = config(mode);
        let heap = Heap::new(&config).unwrap();
        let mut classes = ClassTable::new(false);
        let node = node_class(&mut classes);
        let sources = fill_upper_half(&heap, &classes, node);
        let objects: usize = sources.iter().map(Vec::len).sum();

        let mut forwarding = Forwarding::select(&config, heap.layout());
        forwarding.begin();
        forwarding.reserve(objects);
        let memory = heap.memory();
        for (i, region) in sources.iter().enumerate() {
            let source = NUM_REGIONS / 2 + i;
            forwarding.begin_region(source, region.len());
            let dest = heap.region(i).bottom();
            for (j, &obj) in region.iter().enumerate() {
                forwarding.forward_to(memory, obj, dest + j * NODE_WORDS * 8);
            }
        }
        forwarding.grow_if_requested();

        group.throughput(Throughput::Elements(objects as u64));
        group.bench_function(mode.as_str(), |b| {
            b.iter(|| {
                let mut sum = 0usize;
                for region in &sources {
                    for &obj in region {
                        sum = sum.wrapping_add(forwarding.forwardee(memory, black_box(obj)).unwrap_or(0));
                    }
                }
                black_box(sum)
            })
        });
        forwarding.end();
    }

    group.finish();
}

struct Fragmented {
    heap: Heap,
    classes: ClassTable,
    roots: RootSet,
    driver: CompactionDriver,
}

/// Every region filled, every third node rooted, chained to the next survivor
fn fragmented(config: CompactConfig) -> Fragmented {
    let heap = Heap::new(&config).unwrap();
    let mut classes = ClassTable::new(false);
    let node = node_class(&mut classes);
    let roots = RootSet::new();
    let per_region = (1 << REGION_SHIFT) / NODE_WORDS;

    let mut prev = 0;
    for region in 0..NUM_REGIONS {
        for i in 0..per_region {
            let obj = classes.instantiate_in_region(&heap, region, node).unwrap();
            if i % 3 == 0 {
                if prev != 0 {
                    classes.set_reference(&heap, prev, 0, obj);
                }
                roots.add(obj);
                prev = obj;
            }
        }
    }
    let driver = CompactionDriver::new(config, &heap).unwrap();
    Fragmented {
        heap,
        classes,
        roots,
        driver,
    }
}

fn bench_full_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_cycle");
    group.sample_size(20);

    let mut cases: Vec<(String, CompactConfig)> = [
        ForwardingMode::Header,
        ForwardingMode::Sliding,
        ForwardingMode::Hashed,
        ForwardingMode::Dense,
    ]
    .into_iter()
    .map(|mode| (format!("parallel_{}", mode.as_str()), config(mode)))
    .collect();
    cases.push((
        "serial".to_string(),
        CompactConfig {
            style: CompactionStyle::Serial,
            ..config(ForwardingMode::Header)
        },
    ));

    for (name, config) in cases {
        group.bench_function(name, |b| {
            b.iter_batched(
                || fragmented(config.clone()),
                |mut f| {
                    let stats = f.driver.collect(&f.heap, &f.classes, &TracingMarker, &f.roots);
                    black_box(stats.moved_objects)
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_forwardee_lookup, bench_full_cycle);
criterion_main!(benches);
