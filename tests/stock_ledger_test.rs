mod common;

use std::sync::atomic::{AtomicU32, Ordering};

use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait, ExecResult, QueryResult,
    Statement,
};

use storefront_api::entities::product;
use storefront_api::errors::ServiceError;
use storefront_api::models::StockUnitRef;
use storefront_api::services::stock_ledger::{ReservationRequest, StockLedger};

/// Connection wrapper that fails the nth decrement statement with a driver
/// error, leaving every other statement untouched. Models a connection drop
/// in the middle of a multi-unit reservation.
struct FailingConn {
    inner: DatabaseConnection,
    decrements_seen: AtomicU32,
    fail_on: u32,
}

impl FailingConn {
    fn new(inner: DatabaseConnection, fail_on: u32) -> Self {
        Self {
            inner,
            decrements_seen: AtomicU32::new(0),
            fail_on,
        }
    }
}

#[async_trait::async_trait]
impl ConnectionTrait for FailingConn {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        if stmt.sql.contains("available_quantity - ") {
            let seen = self.decrements_seen.fetch_add(1, Ordering::SeqCst) + 1;
            if seen == self.fail_on {
                return Err(DbErr::Custom("connection lost".to_string()));
            }
        }
        self.inner.execute(stmt).await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        self.inner.execute_unprepared(sql).await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        self.inner.query_one(stmt).await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        self.inner.query_all(stmt).await
    }
}

#[tokio::test]
async fn reserve_compensates_when_a_decrement_statement_fails() {
    let db = common::setup_db().await;
    let first = common::seed_product(&db, rust_decimal_macros::dec!(10.00), 5).await;
    let second = common::seed_product(&db, rust_decimal_macros::dec!(20.00), 5).await;

    let conn = FailingConn::new(db.clone(), 2);
    let ledger = StockLedger::new();
    let requests = vec![
        ReservationRequest {
            unit: StockUnitRef {
                product_id: first.id,
                variant_id: None,
            },
            quantity: 3,
        },
        ReservationRequest {
            unit: StockUnitRef {
                product_id: second.id,
                variant_id: None,
            },
            quantity: 2,
        },
    ];

    let result = ledger.reserve(&conn, &requests).await;
    assert!(matches!(result, Err(ServiceError::DatabaseError(_))));

    // The first unit's decrement went through before the failure; the batch
    // must have put it back.
    let first_after = product::Entity::find_by_id(first.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first_after.available_quantity, 5);

    let second_after = product::Entity::find_by_id(second.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second_after.available_quantity, 5);
}
