use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use rust_decimal::Decimal;
use tallyline_core::{BranchId, CashAmounts, Quantity, StockItemId, TenantId, UserId};
use tallyline_infra::{
    BalanceProjector, InMemoryLedger, InMemoryStockCatalog, InventoryMovements, LedgerStores,
};
use tallyline_inventory::{CorrectStock, ReceiveStock};

struct Fixture {
    runtime: tokio::runtime::Runtime,
    ledger: Arc<InMemoryLedger>,
    catalog: Arc<InMemoryStockCatalog>,
    tenant: TenantId,
    branch: BranchId,
    item: StockItemId,
}

fn fixture() -> Fixture {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let catalog = Arc::new(InMemoryStockCatalog::new());
    let (tenant, branch, item) = (TenantId::new(), BranchId::new(), StockItemId::new());
    catalog.assign(tenant, branch, item, Some(Decimal::from(5)));
    Fixture {
        runtime,
        ledger: Arc::new(InMemoryLedger::new()),
        catalog,
        tenant,
        branch,
        item,
    }
}

impl Fixture {
    fn movements(&self) -> InventoryMovements<InMemoryLedger> {
        InventoryMovements::new(
            self.ledger.clone(),
            LedgerStores::from_backend(self.ledger.clone()),
            self.catalog.clone(),
        )
    }

    fn projector(&self) -> BalanceProjector<InMemoryLedger> {
        BalanceProjector::new(
            self.ledger.clone(),
            LedgerStores::from_backend(self.ledger.clone()),
            self.catalog.clone(),
        )
    }

    fn receive(&self, q: i64) -> ReceiveStock {
        ReceiveStock {
            tenant_id: self.tenant,
            branch_id: self.branch,
            stock_item_id: self.item,
            quantity: Quantity::from(q),
            note: None,
            actor_id: UserId::new(),
            occurred_at: None,
        }
    }

    /// Fill the journal with `n` alternating receipts and corrections.
    fn seed(&self, n: usize) {
        let movements = self.movements();
        self.runtime.block_on(async {
            for i in 0..n {
                if i % 2 == 0 {
                    movements.receive(self.receive(3)).await.unwrap();
                } else {
                    movements
                        .correct(CorrectStock {
                            tenant_id: self.tenant,
                            branch_id: self.branch,
                            stock_item_id: self.item,
                            delta: Decimal::from(-1),
                            note: "count".into(),
                            actor_id: UserId::new(),
                            occurred_at: None,
                        })
                        .await
                        .unwrap();
                }
            }
        });
    }
}

fn bench_receive_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("inventory_append");
    group.throughput(Throughput::Elements(1));

    group.bench_function("receive_with_outbox", |b| {
        let f = fixture();
        let movements = f.movements();
        b.iter(|| {
            f.runtime
                .block_on(movements.receive(f.receive(1)))
                .unwrap();
        });
    });

    group.finish();
}

fn bench_on_hand_over_journal(c: &mut Criterion) {
    let mut group = c.benchmark_group("on_hand_aggregation");

    for journal_len in [10usize, 100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*journal_len as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(journal_len),
            journal_len,
            |b, &journal_len| {
                let f = fixture();
                f.seed(journal_len);
                let projector = f.projector();
                b.iter(|| {
                    let on_hand = f
                        .runtime
                        .block_on(projector.on_hand(f.tenant, f.branch, f.item))
                        .unwrap();
                    black_box(on_hand);
                });
            },
        );
    }

    group.finish();
}

fn bench_session_totals(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_totals");

    for movement_count in [10usize, 1_000, 100_000].iter() {
        let amounts: Vec<CashAmounts> = (0..*movement_count)
            .map(|i| {
                let cents = if i % 3 == 0 { -250 } else { 1_000 };
                CashAmounts::new(Decimal::new(cents, 2), Decimal::from(100 * (i as i64 % 7)))
            })
            .collect();
        group.throughput(Throughput::Elements(*movement_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(movement_count),
            &amounts,
            |b, amounts| {
                b.iter(|| {
                    black_box(tallyline_cash::SessionTotals::from_amounts(
                        CashAmounts::usd(Decimal::from(100)),
                        amounts.iter().copied(),
                    ))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_receive_latency,
    bench_on_hand_over_journal,
    bench_session_totals
);
criterion_main!(benches);
