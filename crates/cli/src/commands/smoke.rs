use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use tradeflow_core::config::{AppConfig, LoadOptions};
use tradeflow_core::store::{PostingInputs, RequestStore};
use tradeflow_core::{
    CoordinatorSettings, ExpenseLine, FinanceTransaction, JobCard, MaterialLine, RecordKind,
    RequestStatus, TransactionKind, UserRole, WorkflowCoordinator,
};
use tradeflow_db::stores::{SqlJobCardStore, SqlTransactionStore, SqlTreasuryStore};
use tradeflow_db::{connect_with_settings, demo_identity, migrations, DbPool, SeedDataset};

use crate::commands::{CommandResult, TracingEventSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config_started = Instant::now();
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms: config_started.elapsed().as_millis() as u64,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms: config_started.elapsed().as_millis() as u64,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("seed_fixtures"));
            checks.push(skipped("expense_workflow"));
            checks.push(skipped("job_card_workflow"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("seed_fixtures"));
            checks.push(skipped("expense_workflow"));
            checks.push(skipped("job_card_workflow"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let db_started = Instant::now();
    let pool = match runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| error.to_string())?;
        migrations::run_pending(&pool).await.map_err(|error| error.to_string())?;
        Ok::<DbPool, String>(pool)
    }) {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected and migrated using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect or migrate: {error}"),
            });
            checks.push(skipped("seed_fixtures"));
            checks.push(skipped("expense_workflow"));
            checks.push(skipped("job_card_workflow"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let seed_started = Instant::now();
    let seed_ok = runtime.block_on(async {
        SeedDataset::load(&pool).await?;
        SeedDataset::verify(&pool).await
    });
    match seed_ok {
        Ok(verification) if verification.ok => checks.push(SmokeCheck {
            name: "seed_fixtures",
            status: SmokeStatus::Pass,
            elapsed_ms: seed_started.elapsed().as_millis() as u64,
            message: format!(
                "{} accounts and {} inventory items in place",
                verification.accounts, verification.items
            ),
        }),
        Ok(_) | Err(_) => {
            checks.push(SmokeCheck {
                name: "seed_fixtures",
                status: SmokeStatus::Fail,
                elapsed_ms: seed_started.elapsed().as_millis() as u64,
                message: "seed fixtures missing or unreadable".to_string(),
            });
            checks.push(skipped("expense_workflow"));
            checks.push(skipped("job_card_workflow"));
            runtime.block_on(async { pool.close().await });
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    }

    let settings = CoordinatorSettings {
        max_commit_attempts: config.workflow.max_commit_attempts,
        ledger_signing_key: config.workflow.ledger_signing_key.clone(),
    };

    let expense_started = Instant::now();
    let expense = runtime.block_on(expense_workflow(&pool, settings.clone()));
    checks.push(match expense {
        Ok(message) => SmokeCheck {
            name: "expense_workflow",
            status: SmokeStatus::Pass,
            elapsed_ms: expense_started.elapsed().as_millis() as u64,
            message,
        },
        Err(message) => SmokeCheck {
            name: "expense_workflow",
            status: SmokeStatus::Fail,
            elapsed_ms: expense_started.elapsed().as_millis() as u64,
            message,
        },
    });

    let job_started = Instant::now();
    let job = runtime.block_on(job_card_workflow(&pool, settings));
    checks.push(match job {
        Ok(message) => SmokeCheck {
            name: "job_card_workflow",
            status: SmokeStatus::Pass,
            elapsed_ms: job_started.elapsed().as_millis() as u64,
            message,
        },
        Err(message) => SmokeCheck {
            name: "job_card_workflow",
            status: SmokeStatus::Fail,
            elapsed_ms: job_started.elapsed().as_millis() as u64,
            message,
        },
    });

    runtime.block_on(async { pool.close().await });
    finalize_report(checks, started.elapsed().as_millis() as u64)
}

/// Draft-submit-approve-approve an expense and confirm the cash balance
/// moved by exactly the transaction amount.
async fn expense_workflow(pool: &DbPool, settings: CoordinatorSettings) -> Result<String, String> {
    let treasury = SqlTreasuryStore::new(pool.clone());
    let opening = treasury
        .account("acct-cash")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("seeded cash account missing")?
        .balance;

    let coordinator = WorkflowCoordinator::new(
        SqlTransactionStore::new(pool.clone()),
        SqlTreasuryStore::new(pool.clone()),
        demo_identity(),
        TracingEventSink,
        settings,
    );

    let amount = Decimal::new(100_00, 2);
    let draft = FinanceTransaction::draft(
        Uuid::new_v4().to_string(),
        TransactionKind::Expense,
        amount,
        "USD",
        Some("acct-cash".to_string()),
        None,
        "Materials",
        "Smoke check consumables",
        Utc::now(),
    );
    let id = draft.id.clone();
    SqlTransactionStore::new(pool.clone()).insert(draft).await.map_err(|e| e.to_string())?;

    coordinator.submit(&id, "u-clerk").await.map_err(|e| e.to_string())?;
    coordinator
        .approve_as_accountant(&id, "u-accountant", None)
        .await
        .map_err(|e| e.to_string())?;
    let record = coordinator
        .approve_as_manager(&id, "u-manager", Some("smoke approval"))
        .await
        .map_err(|e| e.to_string())?;

    let closing = treasury
        .account("acct-cash")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("seeded cash account missing")?
        .balance;

    if record.status != RequestStatus::ApprovedFinal {
        return Err(format!("unexpected final status {:?}", record.status));
    }
    if closing != opening - amount {
        return Err(format!("balance moved {opening} -> {closing}, expected -{amount}"));
    }
    if !coordinator.verify_audit_chain(&record).valid {
        return Err("audit chain failed verification".to_string());
    }

    Ok(format!("expense of {amount} posted; cash balance {opening} -> {closing}"))
}

/// Full job-card approval: stock issued, movement journaled, follow-up
/// expense queued for its own review.
async fn job_card_workflow(pool: &DbPool, settings: CoordinatorSettings) -> Result<String, String> {
    let treasury = SqlTreasuryStore::new(pool.clone());
    let opening = treasury
        .item("item-angle")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("seeded item missing")?
        .on_hand_qty;

    let coordinator = WorkflowCoordinator::new(
        SqlJobCardStore::new(pool.clone()),
        SqlTreasuryStore::new(pool.clone()),
        demo_identity(),
        TracingEventSink,
        settings,
    );

    let qty = Decimal::from(5);
    let draft = JobCard::draft(
        Uuid::new_v4().to_string(),
        "JC-SMOKE-0001",
        "Smoke check shelving",
        "Smoke validation job",
        "client-smoke",
        "Smoke Client",
        vec![MaterialLine::new("item-angle", "Angle iron 40mm", "length", qty, Decimal::new(2_00, 2))],
        vec![ExpenseLine { label: "Labour".to_string(), amount: Decimal::new(20_00, 2) }],
        "USD",
        "acct-cash",
        Utc::now(),
    );
    let id = draft.id.clone();
    SqlJobCardStore::new(pool.clone()).insert(draft).await.map_err(|e| e.to_string())?;

    coordinator.submit(&id, "u-clerk").await.map_err(|e| e.to_string())?;
    coordinator
        .approve_as_accountant(&id, "u-accountant", None)
        .await
        .map_err(|e| e.to_string())?;
    coordinator.approve_as_manager(&id, "u-manager", None).await.map_err(|e| e.to_string())?;

    let closing = treasury
        .item("item-angle")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("seeded item missing")?
        .on_hand_qty;
    if closing != opening - qty {
        return Err(format!("on-hand moved {opening} -> {closing}, expected -{qty}"));
    }

    let spawned = SqlTransactionStore::new(pool.clone())
        .spawned_by(RecordKind::JobCard, &id)
        .await
        .map_err(|e| e.to_string())?;
    if spawned.len() != 1 || spawned[0].status != RequestStatus::Submitted {
        return Err("expected one spawned expense awaiting review".to_string());
    }

    let queue = SqlTransactionStore::new(pool.clone())
        .pending_for_role(UserRole::Accountant)
        .await
        .map_err(|e| e.to_string())?;
    if !queue.iter().any(|tx| tx.id == spawned[0].id) {
        return Err("spawned expense missing from the accountant queue".to_string());
    }

    Ok(format!("stock {opening} -> {closing}; follow-up expense {} queued", spawned[0].id))
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
