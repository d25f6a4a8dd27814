//! Benchmarks for the bridge-core copy loop.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

use bridge_core::io::{CopyOptions, NoOpMetrics, copy_pair};

/// Client sends `data`, target echoes it back, both sides half-close.
async fn round_trip(data: Vec<u8>, options: CopyOptions) -> Vec<u8> {
    let size = data.len();
    let (client, mut server_side) = duplex(size * 2);
    let (mut target_side, target) = duplex(size * 2);

    let relay_handle = tokio::spawn(async move {
        copy_pair(
            &mut server_side,
            &mut target_side,
            options,
            std::future::pending(),
            &NoOpMetrics,
        )
        .await
    });

    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut target_r, mut target_w) = tokio::io::split(target);

    let send_handle = tokio::spawn(async move {
        client_w.write_all(&data).await.unwrap();
        client_w.shutdown().await.unwrap();
    });

    let mut buf = vec![0u8; size];
    target_r.read_exact(&mut buf).await.unwrap();

    target_w.write_all(&buf).await.unwrap();
    target_w.shutdown().await.unwrap();

    client_r.read_exact(&mut buf).await.unwrap();

    send_handle.await.unwrap();
    relay_handle.await.unwrap();
    buf
}

fn bench_copy_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("copy_throughput");

    for data_size in [1024, 65536, 1024 * 1024] {
        group.throughput(Throughput::Bytes(data_size as u64 * 2)); // bidirectional
        group.bench_with_input(
            BenchmarkId::from_parameter(data_size),
            &data_size,
            |b, &size| {
                let data = vec![b'x'; size];
                let options = CopyOptions {
                    half_close: true,
                    ..CopyOptions::default()
                };
                b.iter(|| black_box(rt.block_on(round_trip(data.clone(), options))))
            },
        );
    }

    group.finish();
}

fn bench_copy_buffer_sizes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("copy_buffer_size");

    let data_size = 262144;

    for buffer_size in [4096, 16384, 65536, 1024 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(buffer_size),
            &buffer_size,
            |b, &buffer_size| {
                let data = vec![b'x'; data_size];
                let options = CopyOptions {
                    buffer_size,
                    half_close: true,
                };
                b.iter(|| black_box(rt.block_on(round_trip(data.clone(), options))))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_copy_throughput, bench_copy_buffer_sizes);

criterion_main!(benches);
