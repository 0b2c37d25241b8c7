use criterion::{criterion_group, criterion_main, Criterion};
use pufchain_core::{
    mine::mine_block, Block, CancelToken, ChallengeKey, CredentialStore, CrpSource, DeviceId,
    Puf, PufKind, Status,
};

fn snapshot(devices: u64) -> CredentialStore {
    let mut store = CredentialStore::new();
    for serial in 0..devices {
        let mut puf = Puf::standard(PufKind::XorArbiter, serial);
        let (challenges, responses) = puf.generate(10);
        store.enroll(
            &DeviceId::derive("xor-arbiter", serial),
            challenges.into_iter().map(ChallengeKey::Bits).zip(responses),
            Status::Registered,
        );
    }
    store
}

fn bench_pow(c: &mut Criterion) {
    let payload = snapshot(10).encode().expect("encode");
    c.bench_function("mine_block_difficulty_3", |b| {
        let block = Block::seal(1, 1_600_000_000_000, payload.clone(), "0");
        let cancel = CancelToken::new();
        b.iter(|| {
            let _mined = mine_block(block.clone(), 3, &cancel, None);
        });
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let store = snapshot(10);
    let text = store.encode().expect("encode");
    c.bench_function("snapshot_encode_10_devices", |b| b.iter(|| store.encode()));
    c.bench_function("snapshot_decode_10_devices", |b| {
        b.iter(|| CredentialStore::decode(&text))
    });
}

criterion_group!(benches, bench_pow, bench_snapshot);
criterion_main!(benches);
