use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::{
    cart::{self, CartStatus, Entity as CartEntity},
    cart_item::{self, Entity as CartItemEntity},
    product::{self, Entity as ProductEntity},
};
use crate::errors::ServiceError;

/// One cart line with its catalog record resolved at snapshot time.
/// `product` is `None` when the referenced item no longer exists; checkout
/// validation turns that into a reported failure.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub item_id: Uuid,
    pub quantity: i32,
    pub product: Option<product::Model>,
}

impl CartLine {
    /// Price resolved at snapshot time, zero when the item is gone.
    pub fn unit_price(&self) -> Decimal {
        self.product
            .as_ref()
            .map(|p| p.price)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price() * Decimal::from(self.quantity)
    }
}

/// Ephemeral view of a user's active cart, read fresh at checkout start.
#[derive(Debug, Clone, Serialize)]
pub struct CartSnapshot {
    pub user_id: Uuid,
    pub cart_id: Option<Uuid>,
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Subtotal over the lines whose catalog record still exists.
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(|l| l.line_total()).sum()
    }
}

/// Service for reading and mutating user carts.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves the user's active cart into ordered lines with catalog data.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, user_id: Uuid) -> Result<CartSnapshot, ServiceError> {
        let cart = self.find_active_cart(user_id).await?;

        let Some(cart) = cart else {
            return Ok(CartSnapshot {
                user_id,
                cart_id: None,
                lines: Vec::new(),
            });
        };

        let items = cart
            .find_related(CartItemEntity)
            .order_by_asc(cart_item::Column::Position)
            .all(&*self.db)
            .await?;

        let item_ids: Vec<Uuid> = items.iter().map(|i| i.item_id).collect();
        let products = ProductEntity::find()
            .filter(product::Column::Id.is_in(item_ids))
            .all(&*self.db)
            .await?;

        let lines = items
            .into_iter()
            .map(|item| {
                let product = products.iter().find(|p| p.id == item.item_id).cloned();
                CartLine {
                    item_id: item.item_id,
                    quantity: item.quantity,
                    product,
                }
            })
            .collect();

        Ok(CartSnapshot {
            user_id,
            cart_id: Some(cart.id),
            lines,
        })
    }

    /// Adds an item to the user's active cart, merging quantity when the item
    /// is already present. Creates the cart on first use.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be positive".to_string(),
            ));
        }

        let product = ProductEntity::find_by_id(item_id).one(&*self.db).await?;
        if product.is_none() {
            return Err(ServiceError::NotFound(format!("Item {} not found", item_id)));
        }

        let cart = self.get_or_create_cart(user_id).await?;

        let existing = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ItemId.eq(item_id))
            .one(&*self.db)
            .await?;

        if let Some(existing) = existing {
            let merged = existing.quantity + quantity;
            let mut active: cart_item::ActiveModel = existing.into();
            active.quantity = Set(merged);
            active.updated_at = Set(Some(Utc::now()));
            return Ok(active.update(&*self.db).await?);
        }

        let position = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await?
            .len() as i32;

        let item = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            item_id: Set(item_id),
            quantity: Set(quantity),
            position: Set(position),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        Ok(item.insert(&*self.db).await?)
    }

    /// Removes an item from the user's active cart.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let cart = self
            .find_active_cart(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No active cart for user {}", user_id)))?;

        CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ItemId.eq(item_id))
            .exec(&*self.db)
            .await?;

        Ok(())
    }

    /// Empties the user's active cart and marks it converted. The next
    /// `add_item` starts a fresh cart.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.clear_on(&*self.db, user_id).await
    }

    /// Transaction-capable variant of `clear`, so checkout can convert the
    /// cart atomically with order creation.
    pub async fn clear_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let cart = CartEntity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::Status.eq(CartStatus::Active.as_str()))
            .one(conn)
            .await?;

        let Some(cart) = cart else {
            return Ok(());
        };

        CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(conn)
            .await?;

        let mut active: cart::ActiveModel = cart.into();
        active.status = Set(CartStatus::Converted.as_str().to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.update(conn).await?;

        Ok(())
    }

    async fn find_active_cart(&self, user_id: Uuid) -> Result<Option<cart::Model>, ServiceError> {
        let cart = CartEntity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::Status.eq(CartStatus::Active.as_str()))
            .one(&*self.db)
            .await?;

        Ok(cart)
    }

    async fn get_or_create_cart(&self, user_id: Uuid) -> Result<cart::Model, ServiceError> {
        if let Some(cart) = self.find_active_cart(user_id).await? {
            return Ok(cart);
        }

        // One active cart per user; converted carts stay behind for history.
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            status: Set(CartStatus::Active.as_str().to_string()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        Ok(cart.insert(&*self.db).await?)
    }
}
