use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use xvine_overlay::finger::{FingerArrival, FingerTable};
use xvine_overlay::friend::FriendTable;
use xvine_overlay::peer_id::{closest_peer, PeerId};
use xvine_overlay::trail::{Trail, TrailId};

fn bench_closest_peer(c: &mut Criterion) {
    let mut group = c.benchmark_group("closest_peer");
    group.bench_function("forward", |b| {
        b.iter(|| {
            black_box(closest_peer(
                black_box(0x10),
                black_box(0x20),
                black_box(0x18),
                false,
            ))
        })
    });
    group.bench_function("backward_wrap", |b| {
        b.iter(|| {
            black_box(closest_peer(
                black_box(u64::MAX - 5),
                black_box(3),
                black_box(u64::MAX - 1),
                true,
            ))
        })
    });
    group.finish();
}

fn bench_finger_table_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("finger_table_add");
    for fingers in [4usize, 32, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("populate", fingers),
            fingers,
            |b, &fingers| {
                b.iter(|| {
                    let me = PeerId::derive_for_test(b"bench-root");
                    let mut table = FingerTable::new(me, 2);
                    let friends = FriendTable::new();
                    for i in 0..fingers {
                        let identity = PeerId::derive_for_test(format!("peer-{i}").as_bytes());
                        let hop = PeerId::derive_for_test(format!("hop-{i}").as_bytes());
                        let trail = Trail::new(TrailId::random(), vec![hop]);
                        let index = i % 64;
                        black_box(table.add(
                            identity,
                            FingerArrival::Remote(trail),
                            index,
                            me.value64().wrapping_add(1 << index.min(63)),
                            &friends,
                        ));
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_closest_peer, bench_finger_table_add);
criterion_main!(benches);
