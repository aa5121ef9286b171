use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use medbot_memory::{ChunkId, DocumentChunk, VectorIndex};
use std::hint::black_box;

const DIMENSION: usize = 384;

/// Cheap deterministic pseudo-random vectors (xorshift) so runs are comparable.
fn vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut state = seed.max(1);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        #[allow(clippy::cast_precision_loss)]
        let v = (state % 2000) as f32 / 1000.0 - 1.0;
        v
    };
    (0..count)
        .map(|_| (0..DIMENSION).map(|_| next()).collect())
        .collect()
}

fn build_index(size: usize) -> VectorIndex {
    let chunks = vectors(size, 42)
        .into_iter()
        .enumerate()
        .map(|(i, embedding)| DocumentChunk {
            id: ChunkId(i as u64),
            source: format!("doc{}.txt", i / 10),
            chunk_index: i % 10,
            content: "Influenza is a contagious respiratory illness.".into(),
            embedding,
        })
        .collect();
    VectorIndex::from_chunks("bench", chunks).expect("non-empty index")
}

fn similarity_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity_search");
    let query = vectors(1, 7).remove(0);

    for size in [1_000, 10_000, 50_000] {
        let index = build_index(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("top3", size), &index, |b, index| {
            b.iter(|| index.similarity_search(black_box(&query), 3));
        });
    }

    group.finish();
}

criterion_group!(benches, similarity_search);
criterion_main!(benches);
