use criterion::{black_box, criterion_group, criterion_main, Criterion};
use emb_crypto::{generate_keypair, recover_pubkey, sha3_256, sign_recoverable};

fn bench_sign(c: &mut Criterion) {
    let kp = generate_keypair();
    let digest = sha3_256(b"bench payload");
    c.bench_function("sign_recoverable", |b| {
        b.iter(|| sign_recoverable(black_box(&digest), black_box(&kp.secret_key)).unwrap())
    });
}

fn bench_recover(c: &mut Criterion) {
    let kp = generate_keypair();
    let digest = sha3_256(b"bench payload");
    let sig = sign_recoverable(&digest, &kp.secret_key).unwrap();
    c.bench_function("recover_pubkey", |b| {
        b.iter(|| recover_pubkey(black_box(&digest), black_box(&sig)).unwrap())
    });
}

fn bench_sha3(c: &mut Criterion) {
    let data = vec![0xabu8; 1024];
    c.bench_function("sha3_256_1k", |b| b.iter(|| sha3_256(black_box(&data))));
}

criterion_group!(benches, bench_sign, bench_recover, bench_sha3);
criterion_main!(benches);
