use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use idledger_core::config::{PreKeyConfig, StoreConfig};
use idledger_core::core_identity::{DalekCrypto, DeviceUid, GroupUid, PrivateIdentity};
use idledger_core::core_ledger::{
    ContactGroup, ContactIdentity, DetailsScope, GroupMembership, LedgerStore, NullSink, OwnedIdentity,
    PreKeyIssuer, VersionedDetails,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000_000;

fn file_store(dir: &TempDir) -> LedgerStore {
    let config = StoreConfig {
        database_path: Some(dir.path().join("bench.db")),
        ..Default::default()
    };
    LedgerStore::open(&config, Arc::new(NullSink)).unwrap()
}

fn bench_details_versions(c: &mut Criterion) {
    let mut group = c.benchmark_group("details_versions");
    group.measurement_time(Duration::from_secs(10));

    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let owner = PrivateIdentity::from_secret_bytes(&[3u8; 32]).identity().clone();
    let scope = DetailsScope::owned(owner);

    group.bench_function("create_committed", |b| {
        b.iter(|| {
            let details = store
                .run(|uow| VersionedDetails::create(uow, &scope, "{\"name\":\"bench\"}"))
                .unwrap();
            black_box(details.version())
        });
    });

    for history in [10i64, 100, 1000] {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);
        let scope = DetailsScope::owned(PrivateIdentity::from_secret_bytes(&[4u8; 32]).identity().clone());
        store
            .run(|uow| {
                for _ in 0..history {
                    VersionedDetails::create(uow, &scope, "{}")?;
                }
                Ok(())
            })
            .unwrap();

        group.throughput(Throughput::Elements(history as u64));
        group.bench_with_input(BenchmarkId::new("get_all", history), &history, |b, _| {
            b.iter(|| {
                let uow = store.begin().unwrap();
                black_box(VersionedDetails::get_all(&uow, &scope).unwrap().len())
            });
        });
    }

    group.finish();
}

fn bench_prekey_issue(c: &mut Criterion) {
    let mut group = c.benchmark_group("prekeys");

    let store = LedgerStore::memory().unwrap();
    let issuer = PreKeyIssuer::new(Arc::new(DalekCrypto), PreKeyConfig::default());
    let mut rng = StdRng::seed_from_u64(1);
    let owner = PrivateIdentity::generate(&mut rng);
    let device = DeviceUid::random(&mut rng);
    store.run(|uow| OwnedIdentity::create(uow, owner.identity())).unwrap();

    group.bench_function("issue_and_sign", |b| {
        b.iter(|| {
            let uow = store.begin().unwrap();
            let key = issuer
                .issue(&uow, owner.identity(), &owner, &device, NOW, &mut rng)
                .unwrap();
            uow.rollback().unwrap();
            black_box(key.expiration_timestamp())
        });
    });

    group.finish();
}

fn bench_membership_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("membership");

    let store = LedgerStore::memory().unwrap();
    let mut rng = StdRng::seed_from_u64(2);
    let owner = PrivateIdentity::generate(&mut rng).identity().clone();
    let contact = PrivateIdentity::generate(&mut rng).identity().clone();
    let group_uid = GroupUid::random(&mut rng);
    store
        .run(|uow| {
            OwnedIdentity::create(uow, &owner)?;
            ContactIdentity::create(uow, &owner, &contact)?;
            ContactGroup::create(uow, &group_uid, &owner, NOW)?;
            Ok(())
        })
        .unwrap();

    group.bench_function("add_remove_dispatch", |b| {
        b.iter(|| {
            let dispatched = store
                .run(|uow| {
                    GroupMembership::add(uow, &group_uid, &owner, &contact)?;
                    GroupMembership::remove(uow, &group_uid, &owner, &contact)
                })
                .unwrap();
            black_box(dispatched)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_details_versions, bench_prekey_issue, bench_membership_commit);
criterion_main!(benches);
