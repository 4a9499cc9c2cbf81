use crate::{
    entities::product::{self, Entity as Product},
    errors::ServiceError,
};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    Applied,
    Insufficient,
}

/// The stock ledger: the only code path that writes product stock counters.
///
/// Decrements are issued at order creation (reservation), increments on
/// payment failure (rollback of the reservation). Both run inside the
/// caller's transaction so order rows and stock mutations commit together.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        Ok(Product::find_by_id(id).one(&*self.db).await?)
    }

    /// Atomically decrements stock, guarded at the storage layer by
    /// `stock >= quantity`. Zero rows affected means the product either
    /// disappeared or does not have enough stock; the caller decides which
    /// by re-reading inside its transaction. Never read-modify-write.
    pub async fn decrement_stock<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<StockDecrement, ServiceError> {
        let result = Product::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            Ok(StockDecrement::Insufficient)
        } else {
            Ok(StockDecrement::Applied)
        }
    }

    /// Returns previously reserved stock to the shelf.
    pub async fn increment_stock<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        Product::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;
        Ok(())
    }
}
