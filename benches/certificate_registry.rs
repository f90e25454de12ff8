#![allow(clippy::all)]
//! Benchmarks for certificate lookup on the handshake path.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use r0n_https::modules::https_server::{
    hostname_matches, Certificate, CertificateBundle, CertificatePair, CertificateRegistry,
    RustlsEngine,
};
use std::hint::black_box;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};

fn certificate(index: usize) -> Arc<dyn Certificate> {
    let exact = format!("site{index}.example.com");
    let wildcard = format!("*.tenant{index}.example.net");
    let certified =
        rcgen::generate_simple_self_signed(vec![exact.clone(), wildcard.clone()]).unwrap();
    let pair = CertificatePair::new(
        vec![certified.cert.der().clone()],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        )),
    );
    Arc::new(CertificateBundle::from_pair(
        &format!("site{index}"),
        pair,
        vec![exact, wildcard],
    ))
}

fn registry(size: usize) -> CertificateRegistry<RustlsEngine> {
    let registry = CertificateRegistry::new(Arc::new(RustlsEngine::new()));
    registry
        .append_certificate_list((0..size).map(certificate))
        .unwrap();
    registry
}

// ---------------------------------------------------------------------------
// Registry lookups
// ---------------------------------------------------------------------------

fn bench_find_by_hostname(c: &mut Criterion) {
    let mut group = c.benchmark_group("certificate_registry/find_by_hostname");

    for size in [1usize, 10, 100] {
        let registry = registry(size);
        let last = size - 1;

        group.bench_with_input(BenchmarkId::new("first_exact", size), &size, |b, _| {
            b.iter(|| black_box(registry.find_by_hostname(black_box("site0.example.com"))));
        });

        let host = format!("site{last}.example.com");
        group.bench_with_input(BenchmarkId::new("last_exact", size), &size, |b, _| {
            b.iter(|| black_box(registry.find_by_hostname(black_box(&host))));
        });

        let host = format!("api.tenant{last}.example.net");
        group.bench_with_input(BenchmarkId::new("last_wildcard", size), &size, |b, _| {
            b.iter(|| black_box(registry.find_by_hostname(black_box(&host))));
        });

        group.bench_with_input(BenchmarkId::new("miss", size), &size, |b, _| {
            b.iter(|| black_box(registry.find_by_hostname(black_box("example.org"))));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Hostname matching
// ---------------------------------------------------------------------------

fn bench_hostname_matches(c: &mut Criterion) {
    let mut group = c.benchmark_group("certificate_registry/hostname_matches");

    group.bench_function("exact", |b| {
        b.iter(|| black_box(hostname_matches(black_box("example.com"), black_box("example.com"))));
    });

    group.bench_function("wildcard", |b| {
        b.iter(|| {
            black_box(hostname_matches(
                black_box("*.example.com"),
                black_box("api.example.com"),
            ))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_find_by_hostname, bench_hostname_matches);
criterion_main!(benches);
