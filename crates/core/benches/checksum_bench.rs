//! 체크섬 / 패킷 재작성 벤치마크
//!
//! NAT 변환 한 번에 해당하는 주소+포트 재작성과 체크섬 재계산 비용을 측정합니다.

use std::net::Ipv4Addr;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use irongate_core::checksum::{ip_checksum, tcp_checksum};
use irongate_core::packet::PacketBuilder;

fn bench_ip_checksum(c: &mut Criterion) {
    let packet = PacketBuilder::tcp(
        Ipv4Addr::new(192, 168, 1, 50),
        40000,
        Ipv4Addr::new(93, 184, 216, 34),
        443,
    )
    .build();
    let header = &packet.as_bytes()[..20];

    c.bench_function("ip_checksum_20b", |b| {
        b.iter(|| ip_checksum(black_box(header)))
    });
}

fn bench_tcp_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("tcp_checksum");
    for size in [64usize, 512, 1460] {
        let payload = vec![0xA5u8; size];
        let packet = PacketBuilder::tcp(
            Ipv4Addr::new(192, 168, 1, 50),
            40000,
            Ipv4Addr::new(93, 184, 216, 34),
            443,
        )
        .payload(&payload)
        .build();
        let segment = packet.as_bytes()[20..].to_vec();

        group.throughput(Throughput::Bytes(segment.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &segment, |b, seg| {
            b.iter(|| {
                tcp_checksum(
                    black_box(Ipv4Addr::new(192, 168, 1, 50)),
                    black_box(Ipv4Addr::new(93, 184, 216, 34)),
                    black_box(seg),
                )
            })
        });
    }
    group.finish();
}

fn bench_rewrite_and_update(c: &mut Criterion) {
    let template = PacketBuilder::udp(
        Ipv4Addr::new(192, 168, 1, 50),
        5353,
        Ipv4Addr::new(8, 8, 8, 8),
        53,
    )
    .payload(&[0u8; 64])
    .build();

    c.bench_function("snat_rewrite_udp", |b| {
        b.iter(|| {
            let mut p = template.clone();
            p.set_src_addr(Ipv4Addr::new(203, 0, 113, 1)).unwrap();
            p.set_src_port(black_box(1024)).unwrap();
            p.update_l4_checksum().unwrap();
            p.update_ip_checksum().unwrap();
            p
        })
    });
}

criterion_group!(
    benches,
    bench_ip_checksum,
    bench_tcp_checksum,
    bench_rewrite_and_update
);
criterion_main!(benches);
