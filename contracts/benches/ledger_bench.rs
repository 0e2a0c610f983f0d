// Ledger throughput benchmarks.
//
// Covers plain deposits, withdrawals through a no-op transport, withdrawals
// that fail and roll back, and the mutex-guarded custodian round trip at
// various account counts.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use custody_contracts::custodian::Custodian;
use custody_contracts::ledger::Ledger;
use custody_contracts::transfer::{transfer_fn, TransferError};
use custody_protocol::Address;

fn bench_deposit(c: &mut Criterion) {
    let account = Address::repeat_byte(0x01);

    c.bench_function("ledger/deposit", |b| {
        b.iter_batched(
            || Ledger::new(u64::MAX, u64::MAX),
            |mut ledger| {
                for _ in 0..100 {
                    ledger.deposit(&account, 10).unwrap();
                }
                ledger
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_withdraw(c: &mut Criterion) {
    let account = Address::repeat_byte(0x02);
    let mut transport = transfer_fn(|_: &mut Ledger, _: &Address, _: u64| Ok(()));

    c.bench_function("ledger/withdraw", |b| {
        b.iter_batched(
            || {
                let mut ledger = Ledger::new(10, u64::MAX);
                ledger.deposit(&account, 1_000).unwrap();
                ledger
            },
            |mut ledger| {
                for _ in 0..100 {
                    ledger.withdraw(&account, 10, &mut transport).unwrap();
                }
                ledger
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_withdraw_rollback(c: &mut Criterion) {
    let account = Address::repeat_byte(0x03);
    let mut ledger = Ledger::new(10, u64::MAX);
    ledger.deposit(&account, 1_000).unwrap();
    let mut failing = transfer_fn(|_: &mut Ledger, to: &Address, _: u64| {
        Err(TransferError::Rejected { recipient: *to })
    });

    c.bench_function("ledger/withdraw_rollback", |b| {
        b.iter(|| ledger.withdraw(&account, 10, &mut failing).unwrap_err());
    });
}

fn bench_custodian_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("custodian/round_trip");

    for accounts in [1usize, 16, 256] {
        let custodian = Custodian::new(Ledger::new(100, u64::MAX));
        let parties: Vec<Address> = (0..accounts)
            .map(|i| {
                let mut bytes = [0u8; 20];
                bytes[..8].copy_from_slice(&(i as u64).to_be_bytes());
                Address::from_bytes(bytes)
            })
            .collect();
        for party in &parties {
            custodian.fund_wallet(party, 1_000_000).unwrap();
        }

        group.throughput(Throughput::Elements(accounts as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(accounts),
            &parties,
            |b, parties| {
                b.iter(|| {
                    for party in parties {
                        custodian.deposit(party, 50).unwrap();
                        custodian.withdraw(party, 50).unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_deposit,
    bench_withdraw,
    bench_withdraw_rollback,
    bench_custodian_round_trip,
);
criterion_main!(benches);
