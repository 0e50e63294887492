//! services/api/src/testing.rs
//!
//! In-memory fakes of every port and a harness that wires the engine, the
//! dispatch queue, the reconciler and the order lifecycle together.

use crate::adapters::memory::InMemorySessionStore;
use crate::engine::{DialogueEngine, EnginePorts, EngineSettings, FollowUpScheduler};
use crate::events::EventBus;
use crate::orders::OrderLifecycle;
use crate::payments::dispatch::{DispatchQueue, DispatchSettings, DispatchWorker};
use crate::payments::reconciler::PaymentReconciler;
use async_trait::async_trait;
use bar_bot_core::catalog::name_matches_query;
use bar_bot_core::domain::{
    Button, ChargeRequest, ListRow, Menu, Order, OrderItem, OrderStatus, PaymentMethod, Product,
    Session, StaffUser, User,
};
use bar_bot_core::phone::same_subscriber;
use bar_bot_core::ports::{
    CatalogService, ChatGateway, OrderRepository, PaymentGateway, PortError, PortResult,
    SessionStore, StaffRepository, UserRepository,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const CUSTOMER: &str = "254711000001";
pub const STAFF_PHONE: &str = "254700000099";

//=========================================================================================
// Catalog
//=========================================================================================

pub fn product(name: &str, category: &str, price: Decimal) -> Product {
    Product {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        price,
        category: category.to_string(),
        stock_quantity: 50,
        is_active: true,
    }
}

pub fn bar_menu() -> Vec<Product> {
    vec![
        product("Mojito", "Cocktails", dec!(800)),
        product("Tanqueray", "Gin", dec!(3500)),
        product("Beefeater", "Gin", dec!(2800)),
        product("Gordon's", "Gin", dec!(3000)),
        product("Johnnie Walker Red", "Whisky", dec!(3200)),
        product("Johnnie Walker Black", "Whisky", dec!(4500)),
        product("Tusker", "Beer", dec!(750)),
    ]
}

#[derive(Default)]
pub struct InMemoryCatalog {
    products: Mutex<Vec<Product>>,
    failing: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products: Mutex::new(products),
            failing: AtomicBool::new(false),
        }
    }

    pub fn find(&self, name: &str) -> Option<Product> {
        self.products.lock().unwrap().iter().find(|p| p.name == name).cloned()
    }

    fn update(&self, id: Uuid, change: impl FnOnce(&mut Product)) {
        let mut products = self.products.lock().unwrap();
        if let Some(product) = products.iter_mut().find(|p| p.id == id) {
            change(product);
        }
    }

    pub fn set_stock(&self, id: Uuid, stock: i32) {
        self.update(id, |p| p.stock_quantity = stock);
    }

    pub fn set_price(&self, id: Uuid, price: Decimal) {
        self.update(id, |p| p.price = price);
    }

    pub fn set_active(&self, id: Uuid, active: bool) {
        self.update(id, |p| p.is_active = active);
    }

    /// Makes every read fail, as an unreachable database would.
    pub fn fail_reads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> PortResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("catalog unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalog {
    async fn get_menu(&self) -> PortResult<Menu> {
        self.check()?;
        let mut menu = Menu::new();
        for product in self.products.lock().unwrap().iter().filter(|p| p.is_active) {
            menu.entry(product.category.clone())
                .or_default()
                .push(product.clone());
        }
        Ok(menu)
    }

    async fn get_product(&self, product_id: Uuid) -> PortResult<Product> {
        self.check()?;
        self.products
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == product_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("product {product_id}")))
    }

    async fn search_products(&self, query: &str) -> PortResult<Vec<Product>> {
        self.check()?;
        let mut found: Vec<Product> = self
            .products
            .lock()
            .unwrap()
            .iter()
            .filter(|p| name_matches_query(p, query))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

//=========================================================================================
// Orders and Users
//=========================================================================================

/// A PENDING order for 2 x Tusker (KES 1500) charged to `phone`, owned by a
/// user the fakes do not know about.
pub fn pending_order(phone: &str) -> Order {
    let id = Uuid::new_v4();
    Order {
        id,
        user_id: Uuid::new_v4(),
        customer_phone: phone.to_string(),
        table_number: None,
        total_amount: dec!(1500),
        status: OrderStatus::Pending,
        payment_method: PaymentMethod::Mpesa,
        payment_reference: None,
        pickup_code: "4821".to_string(),
        items: vec![OrderItem {
            id: Uuid::new_v4(),
            order_id: id,
            product_id: Uuid::new_v4(),
            product_name: "Tusker".to_string(),
            quantity: 2,
            price_at_time: dec!(750),
        }],
        created_at: Utc::now(),
        ready_at: None,
        ready_by: None,
        completed_at: None,
        completed_by: None,
    }
}

#[derive(Default)]
pub struct InMemoryOrders {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl InMemoryOrders {
    pub fn insert(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    pub fn get(&self, order_id: Uuid) -> Option<Order> {
        self.orders.lock().unwrap().get(&order_id).cloned()
    }

    pub fn set_status(&self, order_id: Uuid, status: OrderStatus) {
        if let Some(order) = self.orders.lock().unwrap().get_mut(&order_id) {
            order.status = status;
        }
    }

    /// Every order, oldest first.
    pub fn all(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.lock().unwrap().values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    fn pending_newest_first(&self, keep: impl Fn(&Order) -> bool) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.status == OrderStatus::Pending && keep(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrders {
    async fn create_order(&self, order: &Order) -> PortResult<()> {
        self.insert(order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> PortResult<Order> {
        self.get(order_id)
            .ok_or_else(|| PortError::NotFound(format!("order {order_id}")))
    }

    async fn transition_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        actor: Option<&str>,
    ) -> PortResult<bool> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| PortError::NotFound(format!("order {order_id}")))?;
        if order.status != from {
            return Ok(false);
        }
        order.status = to;
        match to {
            OrderStatus::Ready => {
                order.ready_at = Some(Utc::now());
                order.ready_by = actor.map(str::to_string);
            }
            OrderStatus::Completed => {
                order.completed_at = Some(Utc::now());
                order.completed_by = actor.map(str::to_string);
            }
            _ => {}
        }
        Ok(true)
    }

    async fn find_pending_by_phone_and_amount(
        &self,
        phone: &str,
        amount: Decimal,
    ) -> PortResult<Option<Order>> {
        Ok(self
            .pending_newest_first(|o| o.total_amount == amount && same_subscriber(&o.customer_phone, phone))
            .into_iter()
            .next())
    }

    async fn find_recent_pending_by_amount(
        &self,
        amount: Decimal,
        since: DateTime<Utc>,
    ) -> PortResult<Vec<Order>> {
        Ok(self.pending_newest_first(|o| o.total_amount == amount && o.created_at > since))
    }
}

#[derive(Default)]
pub struct InMemoryUsers {
    users: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUsers {
    pub fn find(&self, phone: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.phone_number == phone)
            .cloned()
    }

    /// Returns the user for `phone`, creating it if needed.
    pub fn seed(&self, phone: &str) -> User {
        if let Some(user) = self.find(phone) {
            return user;
        }
        let user = User {
            id: Uuid::new_v4(),
            phone_number: phone.to_string(),
            name: None,
            created_at: Utc::now(),
        };
        self.users.lock().unwrap().insert(user.id, user.clone());
        user
    }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn get_or_create_by_phone(&self, phone: &str) -> PortResult<User> {
        Ok(self.seed(phone))
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))
    }
}

#[derive(Default)]
pub struct InMemoryStaff {
    staff: Vec<StaffUser>,
    sessions: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
}

impl InMemoryStaff {
    pub fn new(staff: Vec<StaffUser>) -> Self {
        Self {
            staff,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl StaffRepository for InMemoryStaff {
    async fn list_active_staff(&self) -> PortResult<Vec<StaffUser>> {
        Ok(self.staff.iter().filter(|s| s.is_active).cloned().collect())
    }

    async fn create_staff_session(
        &self,
        session_id: &str,
        staff_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), (staff_id, expires_at));
        Ok(())
    }

    async fn validate_staff_session(&self, session_id: &str) -> PortResult<Uuid> {
        match self.sessions.lock().unwrap().get(session_id) {
            Some((staff_id, expires_at)) if *expires_at > Utc::now() => Ok(*staff_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_staff_session(&self, session_id: &str) -> PortResult<()> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }
}

//=========================================================================================
// Providers
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub phone: String,
    pub text: String,
    pub buttons: Vec<Button>,
    pub rows: Vec<ListRow>,
}

#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<SentMessage>>,
    failing: AtomicBool,
}

impl RecordingChat {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> SentMessage {
        self.sent().pop().expect("no message was sent")
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Makes every send fail after recording it.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, phone: &str, text: &str, buttons: &[Button], rows: &[ListRow]) -> PortResult<()> {
        self.sent.lock().unwrap().push(SentMessage {
            phone: phone.to_string(),
            text: text.to_string(),
            buttons: buttons.to_vec(),
            rows: rows.to_vec(),
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("chat provider unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatGateway for RecordingChat {
    async fn send_text(&self, phone: &str, text: &str) -> PortResult<()> {
        self.record(phone, text, &[], &[])
    }

    async fn send_buttons(&self, phone: &str, text: &str, buttons: &[Button]) -> PortResult<()> {
        self.record(phone, text, buttons, &[])
    }

    async fn send_list(
        &self,
        phone: &str,
        text: &str,
        _button_label: &str,
        rows: &[ListRow],
    ) -> PortResult<()> {
        self.record(phone, text, &[], rows)
    }
}

#[derive(Default)]
pub struct RecordingPaymentGateway {
    calls: Mutex<Vec<(ChargeRequest, tokio::time::Instant)>>,
}

impl RecordingPaymentGateway {
    pub fn calls(&self) -> Vec<(ChargeRequest, tokio::time::Instant)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingPaymentGateway {
    async fn initiate_charge(&self, request: &ChargeRequest) -> PortResult<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .push((request.clone(), tokio::time::Instant::now()));
        Ok(Some(format!("https://sandbox.kopokopo.com/api/v1/incoming_payments/{}", request.order_id)))
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct Harness {
    pub catalog: Arc<InMemoryCatalog>,
    pub sessions: Arc<InMemorySessionStore>,
    pub orders: Arc<InMemoryOrders>,
    pub users: Arc<InMemoryUsers>,
    pub chat: Arc<RecordingChat>,
    pub payments: Arc<RecordingPaymentGateway>,
    pub events: EventBus,
    pub dispatch: DispatchQueue,
    pub follow_ups: FollowUpScheduler,
    pub engine: DialogueEngine,
    pub reconciler: PaymentReconciler,
    pub lifecycle: OrderLifecycle,
    worker: Mutex<Option<DispatchWorker>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_queue_capacity(DispatchSettings::default().capacity)
    }

    pub fn with_queue_capacity(capacity: usize) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new(bar_menu()));
        let sessions = Arc::new(InMemorySessionStore::new());
        let orders = Arc::new(InMemoryOrders::default());
        let users = Arc::new(InMemoryUsers::default());
        let chat = Arc::new(RecordingChat::default());
        let payments = Arc::new(RecordingPaymentGateway::default());
        let events = EventBus::new();
        let staff_phones = vec![STAFF_PHONE.to_string()];

        let (dispatch, worker) = DispatchQueue::new(
            payments.clone(),
            DispatchSettings {
                capacity,
                ..DispatchSettings::default()
            },
        );
        let follow_ups = FollowUpScheduler::new(Duration::from_secs(45), orders.clone(), chat.clone());
        let engine = DialogueEngine::new(
            EnginePorts {
                catalog: catalog.clone(),
                sessions: sessions.clone(),
                orders: orders.clone(),
                users: users.clone(),
                chat: chat.clone(),
                events: events.clone(),
            },
            dispatch.clone(),
            follow_ups.clone(),
            EngineSettings {
                bar_name: "Destination Cocktails".to_string(),
                session_ttl: Duration::from_secs(7200),
            },
        );
        let reconciler = PaymentReconciler::new(
            orders.clone(),
            users.clone(),
            chat.clone(),
            events.clone(),
            follow_ups.clone(),
            staff_phones.clone(),
        );
        let lifecycle = OrderLifecycle::new(
            orders.clone(),
            users.clone(),
            chat.clone(),
            events.clone(),
            staff_phones,
        );

        Self {
            catalog,
            sessions,
            orders,
            users,
            chat,
            payments,
            events,
            dispatch,
            follow_ups,
            engine,
            reconciler,
            lifecycle,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Spawns the dispatch worker. Cancel the token to stop it.
    pub fn start_dispatch(&self) -> CancellationToken {
        let shutdown = CancellationToken::new();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            tokio::spawn(worker.run(shutdown.clone()));
        }
        shutdown
    }

    pub fn dispatch_backlog(&self) -> usize {
        self.dispatch.backlog()
    }

    pub fn product(&self, name: &str) -> Product {
        self.catalog
            .find(name)
            .unwrap_or_else(|| panic!("no product named {name}"))
    }

    pub async fn send(&self, phone: &str, text: &str) {
        self.engine
            .handle_incoming_message(phone, text, "text")
            .await
            .unwrap();
    }

    pub async fn session(&self, phone: &str) -> Session {
        self.sessions.get(phone).await.unwrap().unwrap_or_default()
    }

    pub async fn put_session(&self, phone: &str, session: Session) {
        self.sessions
            .set(phone, &session, Duration::from_secs(7200))
            .await
            .unwrap();
    }

    /// Browses from START and adds 2 x Tusker (KES 1500) to the cart.
    pub async fn fill_cart(&self, phone: &str) {
        for text in ["browse", "Beer", "Tusker", "2"] {
            self.send(phone, text).await;
        }
    }

    /// A PENDING 2 x Tusker order charged to `phone` and owned by the user
    /// chatting from `phone`.
    pub fn seed_pending_order(&self, phone: &str, amount: Decimal) -> Order {
        let mut order = pending_order(phone);
        order.user_id = self.users.seed(phone).id;
        order.total_amount = amount;
        self.orders.insert(order.clone());
        order
    }
}
