//! Integration tests for the full bill actor pipeline.
//!
//! Tests: BillRegistry → BillHandle → mailboxes → BillActor → gateway + history
//!
//! Verifies:
//! - Bill lifecycle scenarios end in the expected snapshot
//! - Gateway failures follow the fatal / best-effort policy
//! - Recovery from history is exact and re-issues no gateway calls
//! - Queries never observe a half-processed command

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;

    use fees_billing::{Bill, BillStatus};
    use fees_core::{AggregateRoot, BillId, ExpectedVersion, LineItemId};

    use crate::actor::{ActorError, ActorExit, CreateBill, LineItemRequest};
    use crate::config::RuntimeConfig;
    use crate::gateway::{
        FailureMode, FinalizeBill, GatewayError, GatewayOperation, InMemoryGateway,
        PersistenceGateway, SaveLineItem, UpsertBill,
    };
    use crate::history::{HistoryEntry, HistoryStore, InMemoryHistoryStore};
    use crate::registry::{BillRegistry, RegistryError};

    struct Harness {
        registry: BillRegistry,
        gateway: Arc<InMemoryGateway>,
        history: Arc<InMemoryHistoryStore>,
    }

    fn setup() -> Harness {
        setup_with(RuntimeConfig::default().with_activity_timeout(Duration::from_secs(2)))
    }

    fn setup_with(config: RuntimeConfig) -> Harness {
        let gateway = Arc::new(InMemoryGateway::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let registry = BillRegistry::new(gateway.clone(), history.clone(), config);
        Harness {
            registry,
            gateway,
            history,
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn b1() -> CreateBill {
        CreateBill::new("C1", "USD").with_bill_id("B1")
    }

    fn item(id: &str, amount: &str) -> LineItemRequest {
        LineItemRequest::new(format!("charge {id}"), dec(amount)).with_id(id)
    }

    /// Poll the bill until `pred` holds. Inputs of different kinds may be
    /// selected in any order, so a query is not a barrier for earlier commands.
    async fn eventually(
        registry: &BillRegistry,
        bill_id: &BillId,
        pred: impl Fn(&Bill) -> bool,
    ) -> Bill {
        for _ in 0..200 {
            let bill = registry.details(bill_id).await.unwrap();
            if pred(&bill) {
                return bill;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached for bill {bill_id}");
    }

    async fn wait_closed(registry: &BillRegistry, bill_id: &BillId) -> Bill {
        let handle = registry.handle(bill_id).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.wait_closed())
            .await
            .expect("bill did not close in time")
            .unwrap()
    }

    #[tokio::test]
    async fn add_two_items_then_close() {
        let h = setup();
        let handle = h.registry.create_bill(b1()).await.unwrap();
        let id = handle.bill_id().clone();

        handle.add_line_item(item("L1", "100.50")).await.unwrap();
        handle.add_line_item(item("L2", "50.25")).await.unwrap();
        eventually(&h.registry, &id, |b| b.line_items().len() == 2).await;

        handle.close().await.unwrap();
        let bill = wait_closed(&h.registry, &id).await;

        assert_eq!(bill.status(), BillStatus::Closed);
        assert_eq!(bill.line_items().len(), 2);
        assert_eq!(bill.line_items()[0].id, LineItemId::new("L1"));
        assert_eq!(bill.line_items()[1].id, LineItemId::new("L2"));
        assert_eq!(bill.total_amount(), dec("150.75"));
        assert!(bill.closed_at().is_some());

        let row = h.gateway.bill(&id).unwrap();
        assert_eq!(row.status, BillStatus::Closed);
        assert_eq!(row.total_amount, dec("150.75"));
        assert_eq!(h.gateway.line_items(&id).len(), 2);
    }

    #[tokio::test]
    async fn close_empty_bill() {
        let h = setup();
        let handle = h.registry.create_bill(b1()).await.unwrap();

        let opened = handle.details().await.unwrap();
        assert_eq!(opened.status(), BillStatus::Open);
        assert_eq!(opened.total_amount(), Decimal::ZERO);
        assert!(opened.closed_at().is_none());

        handle.close().await.unwrap();
        let bill = wait_closed(&h.registry, handle.bill_id()).await;
        assert_eq!(bill.status(), BillStatus::Closed);
        assert!(bill.line_items().is_empty());
        assert_eq!(bill.total_amount(), Decimal::ZERO);
        assert!(bill.closed_at().is_some());
    }

    #[tokio::test]
    async fn finalize_failure_still_closes_bill() {
        let h = setup();
        h.gateway.fail(
            GatewayOperation::FinalizeBill,
            FailureMode::Error(GatewayError::Database("disk full".to_string())),
        );
        let handle = h.registry.create_bill(b1()).await.unwrap();
        handle.add_line_item(item("L1", "10")).await.unwrap();
        eventually(&h.registry, handle.bill_id(), |b| b.line_items().len() == 1).await;

        handle.close().await.unwrap();
        let bill = wait_closed(&h.registry, handle.bill_id()).await;

        assert_eq!(bill.status(), BillStatus::Closed);
        assert_eq!(bill.total_amount(), dec("10"));
        assert_eq!(h.gateway.calls(GatewayOperation::FinalizeBill), 1);
        assert_eq!(h.gateway.bill(handle.bill_id()).unwrap().status, BillStatus::Open);
    }

    #[tokio::test]
    async fn upsert_failure_means_bill_was_never_created() {
        let h = setup();
        h.gateway.fail(
            GatewayOperation::UpsertBill,
            FailureMode::Error(GatewayError::Unavailable("db down".to_string())),
        );

        let err = h.registry.create_bill(b1()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Create(ActorError::Initialize(_))));

        let id = BillId::new("B1");
        assert!(matches!(
            h.registry.handle(&id).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(h.history.load(&id).unwrap().is_empty());

        // The id is free again once the store recovers.
        h.gateway.heal(GatewayOperation::UpsertBill);
        h.registry.create_bill(b1()).await.unwrap();
    }

    #[tokio::test]
    async fn save_failure_keeps_item_in_bill() {
        let h = setup();
        h.gateway.fail(
            GatewayOperation::SaveLineItem,
            FailureMode::Error(GatewayError::Database("constraint".to_string())),
        );
        let handle = h.registry.create_bill(b1()).await.unwrap();

        handle.add_line_item(item("L1", "42.00")).await.unwrap();
        let bill = eventually(&h.registry, handle.bill_id(), |b| b.line_items().len() == 1).await;

        assert_eq!(bill.total_amount(), dec("42.00"));
        assert!(bill.is_open());
        assert!(h.gateway.line_items(handle.bill_id()).is_empty());
    }

    #[tokio::test]
    async fn activity_timeout_counts_as_failure() {
        let h = setup_with(
            RuntimeConfig::default().with_activity_timeout(Duration::from_millis(50)),
        );
        h.gateway.fail(
            GatewayOperation::SaveLineItem,
            FailureMode::Hang(Duration::from_millis(500)),
        );
        let handle = h.registry.create_bill(b1()).await.unwrap();

        handle.add_line_item(item("L1", "1")).await.unwrap();
        let bill = eventually(&h.registry, handle.bill_id(), |b| b.line_items().len() == 1).await;
        assert_eq!(bill.total_amount(), dec("1"));
        assert!(h.gateway.line_items(handle.bill_id()).is_empty());

        h.gateway.fail(
            GatewayOperation::UpsertBill,
            FailureMode::Hang(Duration::from_millis(500)),
        );
        let err = h
            .registry
            .create_bill(CreateBill::new("C2", "EUR"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Create(ActorError::Initialize(GatewayError::Timeout { after_ms: 50 }))
        ));
    }

    #[tokio::test]
    async fn redelivered_line_item_is_ignored() {
        let h = setup();
        let handle = h.registry.create_bill(b1()).await.unwrap();

        handle.add_line_item(item("L1", "5")).await.unwrap();
        handle.add_line_item(item("L1", "5")).await.unwrap();
        handle.add_line_item(item("L2", "7")).await.unwrap();
        let bill = eventually(&h.registry, handle.bill_id(), |b| {
            b.contains_line_item(&LineItemId::new("L2"))
        })
        .await;

        assert_eq!(bill.line_items().len(), 2);
        assert_eq!(bill.total_amount(), dec("12"));
        assert_eq!(h.gateway.calls(GatewayOperation::SaveLineItem), 2);
    }

    #[tokio::test]
    async fn commands_after_close_change_nothing() {
        let h = setup();
        let handle = h.registry.create_bill(b1()).await.unwrap();
        handle.add_line_item(item("L1", "3")).await.unwrap();
        eventually(&h.registry, handle.bill_id(), |b| b.line_items().len() == 1).await;

        handle.close().await.unwrap();
        let closed = wait_closed(&h.registry, handle.bill_id()).await;

        handle.add_line_item(item("L2", "100")).await.unwrap();
        handle.close().await.unwrap();

        let after = h.registry.details(handle.bill_id()).await.unwrap();
        assert_eq!(after, closed);
        assert_eq!(h.gateway.calls(GatewayOperation::FinalizeBill), 1);
        assert_eq!(h.gateway.calls(GatewayOperation::SaveLineItem), 1);
    }

    #[tokio::test]
    async fn interleaved_adds_and_close_stay_consistent() {
        let h = setup();
        let handle = h.registry.create_bill(b1()).await.unwrap();

        let ids: Vec<String> = (0..20).map(|i| format!("L{i:02}")).collect();
        let adder = {
            let handle = handle.clone();
            let ids = ids.clone();
            tokio::spawn(async move {
                for id in ids {
                    handle.add_line_item(item(&id, "1.25")).await.unwrap();
                }
            })
        };
        let closer = {
            let handle = handle.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                handle.close().await.unwrap();
            })
        };
        adder.await.unwrap();
        closer.await.unwrap();

        let bill = wait_closed(&h.registry, handle.bill_id()).await;
        bill.check_invariants().unwrap();
        assert_eq!(
            bill.total_amount(),
            dec("1.25") * Decimal::from(bill.line_items().len() as u64)
        );

        // Accepted items are a prefix of the submission order.
        let accepted: Vec<String> = bill
            .line_items()
            .iter()
            .map(|li| li.id.as_str().to_string())
            .collect();
        assert_eq!(accepted[..], ids[..accepted.len()]);
    }

    #[tokio::test]
    async fn queries_never_observe_partial_commands() {
        let h = setup();
        h.gateway.fail(
            GatewayOperation::SaveLineItem,
            FailureMode::Hang(Duration::from_millis(30)),
        );
        let handle = h.registry.create_bill(b1()).await.unwrap();

        for i in 0..5 {
            handle
                .add_line_item(item(&format!("L{i}"), "2.50"))
                .await
                .unwrap();
        }

        let mut last_len = 0;
        while last_len < 5 {
            let bill = handle.details().await.unwrap();
            bill.check_invariants().unwrap();
            assert!(bill.line_items().len() >= last_len);
            last_len = bill.line_items().len();
        }
    }

    #[tokio::test]
    async fn recovery_replays_history_exactly_without_gateway_calls() {
        let h = setup();
        let handle = h
            .registry
            .create_bill(CreateBill::new("C9", "GBP"))
            .await
            .unwrap();
        let id = handle.bill_id().clone();

        handle
            .add_line_item(LineItemRequest::new("generated id", dec("9.99")))
            .await
            .unwrap();
        handle
            .add_line_item(LineItemRequest::new("another", dec("0.01")))
            .await
            .unwrap();
        let before = eventually(&h.registry, &id, |b| b.line_items().len() == 2).await;
        h.registry.shutdown().await;
        assert!(matches!(handle.outcome(), Some(Ok(ActorExit::Stopped(_)))));

        let calls_before = h.gateway.total_calls();
        let restarted = BillRegistry::new(
            h.gateway.clone(),
            h.history.clone(),
            RuntimeConfig::default(),
        );
        let report = restarted.recover().await.unwrap();
        assert_eq!(report.recovered, vec![id.clone()]);
        assert!(report.failed.is_empty());

        let after = restarted.details(&id).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(after.created_at(), before.created_at());
        assert_eq!(h.gateway.total_calls(), calls_before);

        // The recovered actor is live again.
        let resumed = restarted.handle(&id).await.unwrap();
        resumed.close().await.unwrap();
        let closed = wait_closed(&restarted, &id).await;
        assert_eq!(closed.total_amount(), dec("10.00"));
        assert_eq!(h.gateway.calls(GatewayOperation::FinalizeBill), 1);
    }

    #[tokio::test]
    async fn closed_bills_are_recovered_as_completed() {
        let h = setup();
        let handle = h.registry.create_bill(b1()).await.unwrap();
        handle.close().await.unwrap();
        let closed = wait_closed(&h.registry, handle.bill_id()).await;
        h.registry.shutdown().await;

        let restarted = BillRegistry::new(
            h.gateway.clone(),
            h.history.clone(),
            RuntimeConfig::default(),
        );
        restarted.recover().await.unwrap();

        let recovered = wait_closed(&restarted, handle.bill_id()).await;
        assert_eq!(recovered, closed);
        assert_eq!(h.gateway.calls(GatewayOperation::FinalizeBill), 1);
    }

    #[tokio::test]
    async fn diverging_history_fails_recovery() {
        let h = setup();
        let id = BillId::new("B-corrupt");
        h.history
            .append(
                &id,
                vec![
                    HistoryEntry::Started {
                        params: json!({"bill_id": null, "customer_id": "C1", "currency": "USD"}),
                    },
                    HistoryEntry::EffectRecorded {
                        name: "something_else".to_string(),
                        value: json!(1),
                    },
                ],
                ExpectedVersion::Exact(0),
            )
            .unwrap();

        let report = h.registry.recover().await.unwrap();
        assert!(report.recovered.is_empty());
        assert!(matches!(
            report.failed.as_slice(),
            [(failed, ActorError::NonDeterminism(_))] if failed == &id
        ));
        assert_eq!(h.gateway.total_calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_bill_id_is_rejected() {
        let h = setup();
        h.registry.create_bill(b1()).await.unwrap();
        let err = h.registry.create_bill(b1()).await.unwrap_err();
        assert_eq!(err, RegistryError::AlreadyExists(BillId::new("B1")));
    }

    #[tokio::test]
    async fn concurrent_creators_of_one_id_reach_the_gateway_once() {
        let h = setup();
        h.gateway.fail(
            GatewayOperation::UpsertBill,
            FailureMode::Hang(Duration::from_millis(50)),
        );

        let (alice, mallory) = tokio::join!(
            h.registry
                .create_bill(CreateBill::new("ALICE", "USD").with_bill_id("B1")),
            h.registry
                .create_bill(CreateBill::new("MALLORY", "EUR").with_bill_id("B1")),
        );

        let results = [alice, mallory];
        let created = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(created, 1);
        assert!(results.iter().any(|r| {
            matches!(r, Err(RegistryError::AlreadyExists(id)) if id == &BillId::new("B1"))
        }));
        assert_eq!(h.gateway.calls(GatewayOperation::UpsertBill), 1);

        let id = BillId::new("B1");
        let bill = h.registry.details(&id).await.unwrap();
        let row = h.gateway.bill(&id).unwrap();
        assert_eq!(row.customer_id, bill.customer_id());
        assert_eq!(row.currency, bill.currency());
    }

    #[tokio::test]
    async fn finished_actors_are_not_retained() {
        let h = setup();

        for _ in 0..20 {
            let handle = h
                .registry
                .create_bill(CreateBill::new("C1", "USD"))
                .await
                .unwrap();
            handle.close().await.unwrap();
            wait_closed(&h.registry, handle.bill_id()).await;
        }

        // The supervisor finishes right after publishing the outcome.
        let mut active = h.registry.active_actors().await;
        for _ in 0..200 {
            if active == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            active = h.registry.active_actors().await;
        }
        assert_eq!(active, 0);

        h.registry.create_bill(b1()).await.unwrap();
        assert_eq!(h.registry.active_actors().await, 1);
        assert_eq!(h.registry.list(Some(BillStatus::Closed)).await.len(), 20);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let h = setup();
        let open = h.registry.create_bill(b1()).await.unwrap();
        let closing = h
            .registry
            .create_bill(CreateBill::new("C2", "EUR").with_bill_id("B2"))
            .await
            .unwrap();
        closing.close().await.unwrap();
        wait_closed(&h.registry, closing.bill_id()).await;

        let all = h.registry.list(None).await;
        assert_eq!(all.len(), 2);

        let closed = h.registry.list(Some(BillStatus::Closed)).await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id(), closing.bill_id());

        let still_open = h.registry.list(Some(BillStatus::Open)).await;
        assert_eq!(still_open.len(), 1);
        assert_eq!(still_open[0].id(), open.bill_id());
    }

    #[tokio::test]
    async fn stopped_actor_rejects_commands() {
        let h = setup();
        let handle = h.registry.create_bill(b1()).await.unwrap();
        h.registry.shutdown().await;

        let err = handle.add_line_item(item("L1", "1")).await.unwrap_err();
        assert_eq!(err, RegistryError::ActorUnavailable(BillId::new("B1")));

        // The last snapshot is still readable.
        let bill = handle.details().await.unwrap();
        assert!(bill.is_open());
    }

    /// Gateway whose line item insert panics inside the actor task.
    struct PanickingGateway(InMemoryGateway);

    #[async_trait]
    impl PersistenceGateway for PanickingGateway {
        async fn upsert_bill(&self, params: UpsertBill) -> Result<(), GatewayError> {
            self.0.upsert_bill(params).await
        }

        async fn save_line_item(&self, _params: SaveLineItem) -> Result<(), GatewayError> {
            panic!("driver bug");
        }

        async fn finalize_bill(&self, params: FinalizeBill) -> Result<(), GatewayError> {
            self.0.finalize_bill(params).await
        }
    }

    #[tokio::test]
    async fn panic_in_actor_is_a_distinct_failure() {
        let registry = BillRegistry::new(
            Arc::new(PanickingGateway(InMemoryGateway::new())),
            Arc::new(InMemoryHistoryStore::new()),
            RuntimeConfig::default(),
        );
        let handle = registry.create_bill(b1()).await.unwrap();
        handle.add_line_item(item("L1", "1")).await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), handle.wait_closed())
            .await
            .unwrap()
            .unwrap_err();
        match err {
            RegistryError::Failed {
                source: ActorError::Panicked(msg),
                ..
            } => assert!(msg.contains("driver bug")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!handle.is_live());
    }
}
