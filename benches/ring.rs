use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use memkit::ring::{HashRing, RingHasher};

fn ring_with(servers: usize) -> HashRing<String> {
    let ring = HashRing::with_hasher(RingHasher::Md5);
    for i in 0..servers {
        ring.add(format!("10.0.{}.{}:11211", i / 256, i % 256));
    }
    ring
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_lookup");
    for servers in [4usize, 16, 64, 256] {
        let ring = ring_with(servers);
        let keys: Vec<Vec<u8>> = (0..1024).map(|i| format!("user:{}", i).into_bytes()).collect();
        group.bench_with_input(BenchmarkId::from_parameter(servers), &servers, |b, _| {
            let mut i = 0usize;
            b.iter(|| {
                let key = &keys[i & 1023];
                i = i.wrapping_add(1);
                black_box(ring.lookup(key))
            });
        });
    }
    group.finish();
}

fn bench_membership(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_membership");
    group.bench_function("add_remove_one_of_64", |b| {
        let ring = ring_with(64);
        let server = "10.9.9.9:11211".to_string();
        b.iter(|| {
            ring.add(server.clone());
            ring.remove(&server);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_lookup, bench_membership);
criterion_main!(benches);
