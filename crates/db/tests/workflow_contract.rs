//! End-to-end workflow scenarios against the SQLite adapters, plus the
//! concurrency contract against the in-memory stores.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use tradeflow_core::store::{PostingInputs, RequestStore};
use tradeflow_core::{
    ApprovalLetter, CoordinatorSettings, ExpenseLine, FinanceTransaction, InMemoryEventSink,
    JobCard, MaterialLine, MovementKind, MovementLine, RecordKind, RequestStatus, TransactionKind,
    UserRole, Variation, WorkflowCoordinator, WorkflowError,
};
use tradeflow_db::stores::{
    InMemoryRequestStore, InMemoryTreasury, SqlJobCardStore, SqlTransactionStore,
    SqlTreasuryStore, SqlVariationStore,
};
use tradeflow_db::{connect_with_settings, demo_identity, migrations, DbPool, SeedDataset};

async fn seeded_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    SeedDataset::load(&pool).await.expect("seed");
    pool
}

fn tx_coordinator(
    pool: &DbPool,
) -> WorkflowCoordinator<
    FinanceTransaction,
    SqlTransactionStore,
    SqlTreasuryStore,
    tradeflow_db::stores::InMemoryIdentityProvider,
    InMemoryEventSink,
> {
    WorkflowCoordinator::new(
        SqlTransactionStore::new(pool.clone()),
        SqlTreasuryStore::new(pool.clone()),
        demo_identity(),
        InMemoryEventSink::default(),
        CoordinatorSettings::default(),
    )
}

fn job_coordinator(
    pool: &DbPool,
) -> WorkflowCoordinator<
    JobCard,
    SqlJobCardStore,
    SqlTreasuryStore,
    tradeflow_db::stores::InMemoryIdentityProvider,
    InMemoryEventSink,
> {
    WorkflowCoordinator::new(
        SqlJobCardStore::new(pool.clone()),
        SqlTreasuryStore::new(pool.clone()),
        demo_identity(),
        InMemoryEventSink::default(),
        CoordinatorSettings::default(),
    )
}

fn variation_coordinator(
    pool: &DbPool,
) -> WorkflowCoordinator<
    Variation,
    SqlVariationStore,
    SqlTreasuryStore,
    tradeflow_db::stores::InMemoryIdentityProvider,
    InMemoryEventSink,
> {
    WorkflowCoordinator::new(
        SqlVariationStore::new(pool.clone()),
        SqlTreasuryStore::new(pool.clone()),
        demo_identity(),
        InMemoryEventSink::default(),
        CoordinatorSettings::default(),
    )
}

async fn balance(pool: &DbPool, id: &str) -> Decimal {
    SqlTreasuryStore::new(pool.clone())
        .account(id)
        .await
        .expect("account read")
        .expect("account present")
        .balance
}

async fn on_hand(pool: &DbPool, id: &str) -> Decimal {
    SqlTreasuryStore::new(pool.clone())
        .item(id)
        .await
        .expect("item read")
        .expect("item present")
        .on_hand_qty
}

fn expense_draft(amount: Decimal) -> FinanceTransaction {
    FinanceTransaction::draft(
        Uuid::new_v4().to_string(),
        TransactionKind::Expense,
        amount,
        "USD",
        Some("acct-cash".to_string()),
        None,
        "Materials",
        "Site consumables",
        Utc::now(),
    )
}

fn shelving_job() -> JobCard {
    JobCard::draft(
        Uuid::new_v4().to_string(),
        "JC-2026-0007",
        "Warehouse shelving",
        "Supply and fit shelving bays",
        "client-1",
        "Mercury Hardware",
        vec![MaterialLine::new(
            "item-angle",
            "Angle iron 40mm",
            "length",
            Decimal::from(5),
            Decimal::new(2_00, 2),
        )],
        vec![ExpenseLine { label: "Labour".to_string(), amount: Decimal::new(27_00, 2) }],
        "USD",
        "acct-cash",
        Utc::now(),
    )
}

#[tokio::test]
async fn expense_approval_adjusts_the_account_and_closes_the_trail() {
    let pool = seeded_pool().await;
    let coordinator = tx_coordinator(&pool);

    let draft = expense_draft(Decimal::new(100_00, 2));
    let id = draft.id.clone();
    SqlTransactionStore::new(pool.clone()).insert(draft).await.expect("insert draft");

    coordinator.submit(&id, "u-clerk").await.expect("submit");
    coordinator.approve_as_accountant(&id, "u-accountant", None).await.expect("stage one");
    let record = coordinator
        .approve_as_manager(&id, "u-manager", Some("approved for payment"))
        .await
        .expect("final");

    assert_eq!(record.status, RequestStatus::ApprovedFinal);
    assert_eq!(record.approval_trail.len(), 2);
    assert!(record.postings.is_some());
    assert_eq!(balance(&pool, "acct-cash").await, Decimal::new(400_00, 2));

    let chain = coordinator.verify_audit_chain(&record);
    assert!(chain.valid);
    assert_eq!(chain.verified_entries, 3);
}

#[tokio::test]
async fn transfer_moves_value_between_accounts_in_one_commit() {
    let pool = seeded_pool().await;
    let coordinator = tx_coordinator(&pool);

    let mut draft = expense_draft(Decimal::new(50_00, 2));
    draft.kind = TransactionKind::Transfer;
    draft.source_account_id = Some("acct-bank".to_string());
    draft.target_account_id = Some("acct-cash".to_string());
    let id = draft.id.clone();
    SqlTransactionStore::new(pool.clone()).insert(draft).await.expect("insert");

    coordinator.submit(&id, "u-clerk").await.expect("submit");
    coordinator.approve_as_accountant(&id, "u-accountant", None).await.expect("stage one");
    coordinator.approve_as_manager(&id, "u-manager", None).await.expect("final");

    assert_eq!(balance(&pool, "acct-bank").await, Decimal::new(1950_00, 2));
    assert_eq!(balance(&pool, "acct-cash").await, Decimal::new(550_00, 2));
}

#[tokio::test]
async fn job_card_approval_issues_stock_and_spawns_a_pending_expense() {
    let pool = seeded_pool().await;
    let coordinator = job_coordinator(&pool);

    let draft = shelving_job();
    let id = draft.id.clone();
    let total = draft.total_cost;
    SqlJobCardStore::new(pool.clone()).insert(draft).await.expect("insert");

    coordinator.submit(&id, "u-clerk").await.expect("submit");
    coordinator.approve_as_accountant(&id, "u-accountant", None).await.expect("stage one");
    let card = coordinator.approve_as_manager(&id, "u-manager", None).await.expect("final");

    assert_eq!(on_hand(&pool, "item-angle").await, Decimal::from(15));

    let tx_store = SqlTransactionStore::new(pool.clone());
    let spawned = tx_store.spawned_by(RecordKind::JobCard, &id).await.expect("spawned");
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].status, RequestStatus::Submitted);
    assert_eq!(spawned[0].amount, total);
    assert!(spawned[0].approval_trail.is_empty());

    // The spawned expense queues for its own stage-one review.
    let queue = tx_store.pending_for_role(UserRole::Accountant).await.expect("queue");
    assert!(queue.iter().any(|tx| tx.id == spawned[0].id));

    let postings = card.postings.as_ref().expect("postings");
    assert_eq!(postings.finance_transaction_ids, vec![spawned[0].id.clone()]);
    assert!(postings.inventory_movement_id.is_some());
}

#[tokio::test]
async fn variation_approval_charges_the_chosen_account_for_the_grand_total() {
    let pool = seeded_pool().await;
    let coordinator = variation_coordinator(&pool);
    let store = SqlVariationStore::new(pool.clone());

    let number = store.next_variation_number("jc-1").await.expect("number");
    assert_eq!(number, 1);

    let draft = Variation::draft(
        Uuid::new_v4().to_string(),
        "jc-1",
        "JC-2026-0007",
        number,
        "Client added two extra bays",
        vec![MaterialLine::new(
            "item-bolts",
            "M10 bolt pack",
            "pack",
            Decimal::from(3),
            Decimal::new(3_50, 2),
        )],
        vec![ExpenseLine { label: "Labour".to_string(), amount: Decimal::new(9_50, 2) }],
        "USD",
        "acct-bank",
        Utc::now(),
    );
    let id = draft.id.clone();
    let grand_total = draft.totals.grand_total;
    store.insert(draft).await.expect("insert");

    coordinator.submit(&id, "u-clerk").await.expect("submit");
    coordinator.approve_as_accountant(&id, "u-accountant", None).await.expect("stage one");
    coordinator.approve_as_manager(&id, "u-manager", None).await.expect("final");

    assert_eq!(on_hand(&pool, "item-bolts").await, Decimal::from(45));

    let spawned = SqlTransactionStore::new(pool.clone())
        .spawned_by(RecordKind::Variation, &id)
        .await
        .expect("spawned");
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].amount, grand_total);
    assert_eq!(spawned[0].source_account_id.as_deref(), Some("acct-bank"));
}

#[tokio::test]
async fn rejection_terminates_the_workflow_without_touching_balances() {
    let pool = seeded_pool().await;
    let coordinator = tx_coordinator(&pool);

    let draft = expense_draft(Decimal::new(100_00, 2));
    let id = draft.id.clone();
    SqlTransactionStore::new(pool.clone()).insert(draft).await.expect("insert");

    coordinator.submit(&id, "u-clerk").await.expect("submit");
    let record = coordinator
        .reject_as_accountant(&id, "u-accountant", "insufficient documentation")
        .await
        .expect("rejection");

    assert_eq!(record.status, RequestStatus::RejectedByAccountant);
    assert_eq!(record.approval_trail.len(), 1);
    assert_eq!(balance(&pool, "acct-cash").await, Decimal::new(500_00, 2));

    let error = coordinator
        .approve_as_manager(&id, "u-manager", None)
        .await
        .expect_err("terminal record");
    assert!(matches!(error, WorkflowError::InvalidState { .. }));
}

#[tokio::test]
async fn manager_cannot_skip_the_accountant_stage() {
    let pool = seeded_pool().await;
    let coordinator = tx_coordinator(&pool);

    let draft = expense_draft(Decimal::new(100_00, 2));
    let id = draft.id.clone();
    SqlTransactionStore::new(pool.clone()).insert(draft).await.expect("insert");
    coordinator.submit(&id, "u-clerk").await.expect("submit");

    let error = coordinator
        .approve_as_manager(&id, "u-manager", None)
        .await
        .expect_err("stage two before stage one");
    assert!(matches!(error, WorkflowError::InvalidState { .. }));
}

#[tokio::test]
async fn approval_letter_reference_persists_and_stays_first() {
    let pool = seeded_pool().await;
    let coordinator = tx_coordinator(&pool);

    let draft = expense_draft(Decimal::new(100_00, 2));
    let id = draft.id.clone();
    SqlTransactionStore::new(pool.clone()).insert(draft).await.expect("insert");
    coordinator.submit(&id, "u-clerk").await.expect("submit");
    coordinator.approve_as_accountant(&id, "u-accountant", None).await.expect("stage one");
    let record = coordinator.approve_as_manager(&id, "u-manager", None).await.expect("final");

    let ref_no = ApprovalLetter::reference_number(
        &tradeflow_core::RecordRef::new(RecordKind::Transaction, &id),
        record.updated_at,
    );
    let letter = ApprovalLetter {
        ref_no: ref_no.clone(),
        url: format!("https://letters.example/{ref_no}.pdf"),
        storage_path: format!("approval_letters/transaction/{id}.pdf"),
        generated_at: Utc::now(),
    };

    coordinator.record_approval_letter(&id, letter).await.expect("attach");
    let reloaded = coordinator.fetch(&id).await.expect("reload");
    let stored = reloaded
        .postings
        .as_ref()
        .and_then(|p| p.approval_letter.as_ref())
        .expect("letter stored");
    assert_eq!(stored.ref_no, ref_no);

    let replay = ApprovalLetter {
        ref_no: "APP-REPLAY".to_string(),
        url: "https://letters.example/replay.pdf".to_string(),
        storage_path: "approval_letters/transaction/replay.pdf".to_string(),
        generated_at: Utc::now(),
    };
    let unchanged = coordinator.record_approval_letter(&id, replay).await.expect("no-op");
    assert_eq!(
        unchanged.postings.as_ref().and_then(|p| p.approval_letter.as_ref()).map(|l| &l.ref_no),
        Some(&ref_no)
    );
}

#[tokio::test]
async fn stock_returns_journal_both_movements() {
    let pool = seeded_pool().await;
    let coordinator = job_coordinator(&pool);

    let draft = shelving_job();
    let id = draft.id.clone();
    SqlJobCardStore::new(pool.clone()).insert(draft).await.expect("insert");

    coordinator.submit(&id, "u-clerk").await.expect("submit");
    coordinator.approve_as_accountant(&id, "u-accountant", None).await.expect("stage one");
    coordinator.approve_as_manager(&id, "u-manager", None).await.expect("final");
    assert_eq!(on_hand(&pool, "item-angle").await, Decimal::from(15));

    let card = coordinator
        .return_materials(
            &id,
            "u-manager",
            vec![MovementLine { item_id: "item-angle".to_string(), qty: Decimal::from(2) }],
            Some("two lengths unused".to_string()),
        )
        .await
        .expect("return");

    assert_eq!(on_hand(&pool, "item-angle").await, Decimal::from(17));
    assert_eq!(card.returned_movement_ids.len(), 1);

    let movements = SqlTreasuryStore::new(pool.clone())
        .movements_for_job_card(&id)
        .await
        .expect("movements");
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[0].kind, MovementKind::Issue);
    assert_eq!(movements[1].kind, MovementKind::Return);
    assert_eq!(movements[1].note.as_deref(), Some("two lengths unused"));
}

#[tokio::test]
async fn racing_accountant_approvals_commit_exactly_once() {
    let treasury = Arc::new(InMemoryTreasury::default());
    let store = Arc::new(InMemoryRequestStore::<FinanceTransaction>::new(Arc::clone(&treasury)));
    let coordinator = Arc::new(WorkflowCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&treasury),
        demo_identity(),
        InMemoryEventSink::default(),
        CoordinatorSettings::default(),
    ));

    let draft = expense_draft(Decimal::new(100_00, 2));
    let id = draft.id.clone();
    store.insert(draft).await.expect("insert");
    coordinator.submit(&id, "u-clerk").await.expect("submit");

    let (first, second) = tokio::join!(
        coordinator.approve_as_accountant(&id, "u-accountant", None),
        coordinator.approve_as_accountant(&id, "u-admin", None),
    );

    let successes = [&first, &second].iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 1, "exactly one racer may win");
    for result in [first, second] {
        if let Err(error) = result {
            assert!(matches!(
                error,
                WorkflowError::InvalidState { .. } | WorkflowError::Contention { .. }
            ));
        }
    }

    let record = coordinator.fetch(&id).await.expect("reload");
    assert_eq!(record.status, RequestStatus::ApprovedByAccountant);
    assert_eq!(record.approval_trail.len(), 1);
}
