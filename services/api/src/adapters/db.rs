//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! catalog, order, user and staff ports from the `core` crate. It handles all
//! interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use bar_bot_core::domain::{
    Menu, Order, OrderItem, OrderStatus, PaymentMethod, Product, StaffRole, StaffUser, User,
};
use bar_bot_core::phone::last_nine_digits;
use bar_bot_core::ports::{
    CatalogService, OrderRepository, PortError, PortResult, StaffRepository, UserRepository,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the persistence ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fetch_items(&self, order_id: Uuid) -> PortResult<Vec<OrderItem>> {
        let records = sqlx::query_as::<_, OrderItemRecord>(
            "SELECT oi.id, oi.order_id, oi.product_id, p.name AS product_name, oi.quantity, oi.price_at_time \
             FROM order_items oi JOIN products p ON p.id = oi.product_id \
             WHERE oi.order_id = $1 ORDER BY p.name ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn hydrate(&self, record: OrderRecord) -> PortResult<Order> {
        let items = self.fetch_items(record.id).await?;
        record.to_domain(items)
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(what: String) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => PortError::Unexpected(e.to_string()),
    }
}

const ORDER_COLUMNS: &str = "id, user_id, customer_phone, table_number, total_amount, status, \
     payment_method, payment_reference, pickup_code, created_at, ready_at, ready_by, \
     completed_at, completed_by";

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProductRecord {
    id: Uuid,
    name: String,
    description: Option<String>,
    price: Decimal,
    category: String,
    stock_quantity: i32,
    is_active: bool,
}
impl ProductRecord {
    fn to_domain(self) -> Product {
        Product {
            id: self.id,
            name: self.name,
            description: self.description,
            price: self.price,
            category: self.category,
            stock_quantity: self.stock_quantity,
            is_active: self.is_active,
        }
    }
}

#[derive(FromRow)]
struct OrderRecord {
    id: Uuid,
    user_id: Uuid,
    customer_phone: String,
    table_number: Option<String>,
    total_amount: Decimal,
    status: String,
    payment_method: String,
    payment_reference: Option<String>,
    pickup_code: String,
    created_at: DateTime<Utc>,
    ready_at: Option<DateTime<Utc>>,
    ready_by: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    completed_by: Option<String>,
}
impl OrderRecord {
    fn to_domain(self, items: Vec<OrderItem>) -> PortResult<Order> {
        let status = self
            .status
            .parse::<OrderStatus>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let payment_method = match self.payment_method.as_str() {
            "MPESA" => PaymentMethod::Mpesa,
            other => {
                return Err(PortError::Unexpected(format!(
                    "unknown payment method: {other}"
                )))
            }
        };
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            customer_phone: self.customer_phone,
            table_number: self.table_number,
            total_amount: self.total_amount,
            status,
            payment_method,
            payment_reference: self.payment_reference,
            pickup_code: self.pickup_code,
            items,
            created_at: self.created_at,
            ready_at: self.ready_at,
            ready_by: self.ready_by,
            completed_at: self.completed_at,
            completed_by: self.completed_by,
        })
    }
}

#[derive(FromRow)]
struct OrderItemRecord {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    product_name: String,
    quantity: i32,
    price_at_time: Decimal,
}
impl OrderItemRecord {
    fn to_domain(self) -> PortResult<OrderItem> {
        let quantity = u32::try_from(self.quantity)
            .map_err(|_| PortError::Unexpected(format!("negative quantity on item {}", self.id)))?;
        Ok(OrderItem {
            id: self.id,
            order_id: self.order_id,
            product_id: self.product_id,
            product_name: self.product_name,
            quantity,
            price_at_time: self.price_at_time,
        })
    }
}

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    phone_number: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            phone_number: self.phone_number,
            name: self.name,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct StaffUserRecord {
    id: Uuid,
    phone_number: String,
    name: String,
    role: String,
    pin_hash: String,
    is_active: bool,
}
impl StaffUserRecord {
    fn to_domain(self) -> PortResult<StaffUser> {
        let role = self
            .role
            .parse::<StaffRole>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(StaffUser {
            id: self.id,
            phone_number: self.phone_number,
            name: self.name,
            role,
            pin_hash: self.pin_hash,
            is_active: self.is_active,
        })
    }
}

//=========================================================================================
// `CatalogService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CatalogService for DbAdapter {
    async fn get_menu(&self) -> PortResult<Menu> {
        let records = sqlx::query_as::<_, ProductRecord>(
            "SELECT id, name, description, price, category, stock_quantity, is_active \
             FROM products WHERE is_active ORDER BY category ASC, name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut menu = Menu::new();
        for record in records {
            let product = record.to_domain();
            menu.entry(product.category.clone()).or_default().push(product);
        }
        Ok(menu)
    }

    async fn get_product(&self, product_id: Uuid) -> PortResult<Product> {
        let record = sqlx::query_as::<_, ProductRecord>(
            "SELECT id, name, description, price, category, stock_quantity, is_active \
             FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("Product {} not found", product_id)))?;
        Ok(record.to_domain())
    }

    async fn search_products(&self, query: &str) -> PortResult<Vec<Product>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ProductRecord>(
            "SELECT id, name, description, price, category, stock_quantity, is_active \
             FROM products WHERE is_active AND position(lower($1) in lower(name)) > 0 \
             ORDER BY name ASC",
        )
        .bind(query)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}

//=========================================================================================
// `OrderRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl OrderRepository for DbAdapter {
    async fn create_order(&self, order: &Order) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO orders (id, user_id, customer_phone, table_number, total_amount, status, \
             payment_method, payment_reference, pickup_code, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(&order.customer_phone)
        .bind(&order.table_number)
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.payment_method.as_str())
        .bind(&order.payment_reference)
        .bind(&order.pickup_code)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        for item in &order.items {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| PortError::Unexpected(format!("quantity too large: {}", item.quantity)))?;
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, price_at_time) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(item.id)
            .bind(order.id)
            .bind(item.product_id)
            .bind(quantity)
            .bind(item.price_at_time)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> PortResult<Order> {
        let record = sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("Order {} not found", order_id)))?;
        self.hydrate(record).await
    }

    async fn transition_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        actor: Option<&str>,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3::text, updated_at = NOW(), \
             ready_at = CASE WHEN $3::text = 'READY' THEN NOW() ELSE ready_at END, \
             ready_by = CASE WHEN $3::text = 'READY' THEN $4::text ELSE ready_by END, \
             completed_at = CASE WHEN $3::text = 'COMPLETED' THEN NOW() ELSE completed_at END, \
             completed_by = CASE WHEN $3::text = 'COMPLETED' THEN $4::text ELSE completed_by END \
             WHERE id = $1 AND status = $2::text",
        )
        .bind(order_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_pending_by_phone_and_amount(
        &self,
        phone: &str,
        amount: Decimal,
    ) -> PortResult<Option<Order>> {
        let nine = last_nine_digits(phone);
        let record = sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'PENDING' AND total_amount = $1 \
             AND (customer_phone = $2 \
                  OR (length($3::text) = 9 AND right(regexp_replace(customer_phone, '[^0-9]', '', 'g'), 9) = $3::text)) \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(amount)
        .bind(phone)
        .bind(nine)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match record {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    async fn find_recent_pending_by_amount(
        &self,
        amount: Decimal,
        since: DateTime<Utc>,
    ) -> PortResult<Vec<Order>> {
        let records = sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'PENDING' AND total_amount = $1 AND created_at >= $2 \
             ORDER BY created_at DESC"
        ))
        .bind(amount)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut orders = Vec::with_capacity(records.len());
        for record in records {
            orders.push(self.hydrate(record).await?);
        }
        Ok(orders)
    }
}

//=========================================================================================
// `UserRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl UserRepository for DbAdapter {
    async fn get_or_create_by_phone(&self, phone: &str) -> PortResult<User> {
        sqlx::query(
            "INSERT INTO users (id, phone_number) VALUES ($1, $2) ON CONFLICT (phone_number) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(phone)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, phone_number, name, created_at FROM users WHERE phone_number = $1",
        )
        .bind(phone)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("User with phone {} not found", phone)))?;

        Ok(record.to_domain())
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, phone_number, name, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }
}

//=========================================================================================
// `StaffRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl StaffRepository for DbAdapter {
    async fn list_active_staff(&self) -> PortResult<Vec<StaffUser>> {
        let records = sqlx::query_as::<_, StaffUserRecord>(
            "SELECT id, phone_number, name, role, pin_hash, is_active \
             FROM staff_users WHERE is_active ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn create_staff_session(
        &self,
        session_id: &str,
        staff_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO staff_sessions (id, staff_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(staff_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_staff_session(&self, session_id: &str) -> PortResult<Uuid> {
        let staff_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT s.staff_id FROM staff_sessions s JOIN staff_users u ON u.id = s.staff_id \
             WHERE s.id = $1 AND s.expires_at > NOW() AND u.is_active",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        staff_id.ok_or(PortError::Unauthorized)
    }

    async fn delete_staff_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM staff_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
