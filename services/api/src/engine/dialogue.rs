//! services/api/src/engine/dialogue.rs
//!
//! The Dialogue Engine: one inbound chat message at a time per customer, a
//! closed set of states, and a global reset that always gets a stuck customer
//! back to the menu.

use crate::engine::followup::{FollowUpScheduler, RETRY_PAYMENT_PREFIX};
use crate::events::EventBus;
use crate::payments::dispatch::DispatchQueue;
use bar_bot_core::catalog::{
    format_kes, numbered_listing, ordered_categories, select_product, sort_alphabetically,
    MAX_LIST_ITEMS,
};
use bar_bot_core::domain::{
    Button, Cart, CartItem, ConfirmPrompt, DialogueState, ListRow, Product, ProductScope, Session,
};
use bar_bot_core::phone::{mask, normalize_payment_phone};
use bar_bot_core::ports::{
    CatalogService, ChatGateway, OrderRepository, PortError, PortResult, SessionStore,
    UserRepository,
};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

//=========================================================================================
// Keywords and Affordance Ids
//=========================================================================================

/// Typing any of these wipes the conversation and shows the menu again.
const RESET_KEYWORDS: [&str; 7] = ["hi", "hello", "start", "restart", "reset", "menu", "0"];

/// Inputs in START that open the category list instead of searching.
const BROWSE_TRIGGERS: [&str; 5] = ["order", "browse", "view_menu", "full menu", "add_more"];

pub const VIEW_MENU: &str = "view_menu";
pub const ADD_MORE: &str = "add_more";
pub const CHECKOUT: &str = "checkout";
pub const PAY_SELF: &str = "pay_self";
pub const PAY_OTHER: &str = "pay_other";

static RETRY_PAYMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{RETRY_PAYMENT_PREFIX}([0-9a-fA-F-]{{36}})$"))
        .expect("retry payment pattern is valid")
});

fn retry_target(input: &str) -> Option<Uuid> {
    let captures = RETRY_PAYMENT_PATTERN.captures(input)?;
    Uuid::parse_str(captures.get(1)?.as_str()).ok()
}

//=========================================================================================
// Engine
//=========================================================================================

/// The collaborators the engine talks to.
#[derive(Clone)]
pub struct EnginePorts {
    pub catalog: Arc<dyn CatalogService>,
    pub sessions: Arc<dyn SessionStore>,
    pub orders: Arc<dyn OrderRepository>,
    pub users: Arc<dyn UserRepository>,
    pub chat: Arc<dyn ChatGateway>,
    pub events: EventBus,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub bar_name: String,
    /// Sliding lifetime of a conversation, restarted on every write.
    pub session_ttl: Duration,
}

#[derive(Clone)]
pub struct DialogueEngine {
    pub(super) ports: EnginePorts,
    pub(super) dispatch: DispatchQueue,
    pub(super) follow_ups: FollowUpScheduler,
    pub(super) settings: EngineSettings,
}

impl DialogueEngine {
    pub fn new(
        ports: EnginePorts,
        dispatch: DispatchQueue,
        follow_ups: FollowUpScheduler,
        settings: EngineSettings,
    ) -> Self {
        Self {
            ports,
            dispatch,
            follow_ups,
            settings,
        }
    }

    /// Processes one inbound message. `text` is the typed text or the id of
    /// the tapped button or list row.
    ///
    /// A collaborator failure aborts processing before the session is saved,
    /// so the customer's next message starts from the last committed state.
    pub async fn handle_incoming_message(
        &self,
        phone: &str,
        text: &str,
        message_type: &str,
    ) -> PortResult<()> {
        let input = text.trim();
        let normalized = input.to_lowercase();

        if RESET_KEYWORDS.contains(&normalized.as_str()) {
            info!(phone = %mask(phone), "Conversation reset");
            self.ports.sessions.delete(phone).await?;
            let mut session = Session::fresh();
            self.save(phone, &session).await?;
            self.handle_start(phone, &mut session, "").await?;
            return self.save(phone, &session).await;
        }

        let mut session = self
            .ports
            .sessions
            .get(phone)
            .await?
            .unwrap_or_else(Session::fresh);
        debug!(
            phone = %mask(phone),
            state = %session.state,
            message_type,
            "Handling message"
        );

        if let Some(order_id) = retry_target(input) {
            self.retry_payment(phone, &mut session, order_id).await?;
            return self.save(phone, &session).await;
        }

        match session.state {
            DialogueState::Start => self.handle_start(phone, &mut session, input).await?,
            DialogueState::Browsing => self.handle_browsing(phone, &mut session, input).await?,
            DialogueState::SelectingProduct => {
                self.handle_selecting_product(phone, &mut session, input).await?
            }
            DialogueState::Quantity => self.handle_quantity(phone, &mut session, input).await?,
            DialogueState::ConfirmOrder => {
                self.handle_confirm_order(phone, &mut session, &normalized).await?
            }
            DialogueState::WaitingForPaymentPhone => {
                self.handle_payment_phone(phone, &mut session, input).await?
            }
        }
        self.save(phone, &session).await
    }

    pub(super) async fn save(&self, phone: &str, session: &Session) -> PortResult<()> {
        self.ports
            .sessions
            .set(phone, session, self.settings.session_ttl)
            .await
    }

    //=====================================================================================
    // State Handlers
    //=====================================================================================

    async fn handle_start(&self, phone: &str, session: &mut Session, input: &str) -> PortResult<()> {
        let normalized = input.to_lowercase();
        if input.is_empty() || BROWSE_TRIGGERS.iter().any(|t| normalized.contains(t)) {
            let welcome = format!(
                "👋 Welcome to *{}*!\n\n\
                 Pick a category to see our drinks, or just type the name of a drink to search.",
                self.settings.bar_name
            );
            return self.show_categories(phone, session, &welcome).await;
        }

        let results = self.search(input).await?;
        if results.is_empty() {
            let text = format!(
                "😕 Sorry, we couldn't find any drink matching \"{input}\".\n\n\
                 Try another name or view the full menu."
            );
            let buttons = [Button::new(VIEW_MENU, "View Full Menu")];
            return self.ports.chat.send_buttons(phone, &text, &buttons).await;
        }

        session.scope = ProductScope::Search(input.to_string());
        session.current_product_id = None;
        session.state = DialogueState::SelectingProduct;
        let heading = format!("🔍 Results for \"{input}\"");
        self.show_products(phone, &heading, &results).await
    }

    async fn handle_browsing(&self, phone: &str, session: &mut Session, input: &str) -> PortResult<()> {
        let menu = self.ports.catalog.get_menu().await?;
        let categories = ordered_categories(&menu);

        let Some(category) = categories.iter().find(|c| c.as_str() == input) else {
            self.ports
                .chat
                .send_text(phone, "That menu is expired. Here is the latest one.")
                .await?;
            return self
                .show_categories(phone, session, "Please pick a category:")
                .await;
        };

        let products = active_sorted(menu.get(category).cloned().unwrap_or_default());
        session.scope = ProductScope::Category(category.clone());
        session.current_product_id = None;
        session.state = DialogueState::SelectingProduct;
        self.show_products(phone, &format!("*{category}*"), &products).await
    }

    async fn handle_selecting_product(
        &self,
        phone: &str,
        session: &mut Session,
        input: &str,
    ) -> PortResult<()> {
        let products = self.active_products(&session.scope).await?;
        if products.is_empty() {
            return self
                .show_categories(phone, session, "Those drinks are no longer available. Please pick a category:")
                .await;
        }

        let Some((product, strategy)) = select_product(input, &products) else {
            return self
                .ports
                .chat
                .send_text(
                    phone,
                    "Invalid option. Please reply with the number (e.g., '1') or the name of the drink.",
                )
                .await;
        };
        debug!(product = %product.name, ?strategy, "Product selected");

        if product.stock_quantity <= 0 {
            let text = format!("😔 Sorry, *{}* is out of stock. Please pick another drink.", product.name);
            return self.ports.chat.send_text(phone, &text).await;
        }

        session.current_product_id = Some(product.id);
        session.state = DialogueState::Quantity;
        let text = format!(
            "*{}* - {}\n\nHow many would you like? (e.g., 2)",
            product.name,
            format_kes(product.price)
        );
        self.ports.chat.send_text(phone, &text).await
    }

    async fn handle_quantity(&self, phone: &str, session: &mut Session, input: &str) -> PortResult<()> {
        let Some(product_id) = session.current_product_id else {
            return self
                .show_categories(phone, session, "Please pick a category:")
                .await;
        };

        let quantity = match input.parse::<u32>() {
            Ok(q) if q > 0 => q,
            _ => {
                return self
                    .ports
                    .chat
                    .send_text(phone, "Please enter a valid number (e.g., 2)")
                    .await
            }
        };

        let product = match self.ports.catalog.get_product(product_id).await {
            Ok(product) if product.is_active => product,
            Ok(_) | Err(PortError::NotFound(_)) => {
                self.ports
                    .chat
                    .send_text(phone, "Sorry, that drink is no longer available.")
                    .await?;
                return self
                    .show_categories(phone, session, "Please pick a category:")
                    .await;
            }
            Err(e) => return Err(e),
        };

        let in_stock = u32::try_from(product.stock_quantity).unwrap_or(0);
        if quantity > in_stock {
            let text = format!(
                "Sorry, only {in_stock} available in stock. Please enter a smaller quantity."
            );
            return self.ports.chat.send_text(phone, &text).await;
        }

        session.cart.add(CartItem::from_product(&product, quantity));
        session.current_product_id = None;
        session.state = DialogueState::ConfirmOrder;
        session.confirm_prompt = ConfirmPrompt::CartActions;

        let text = format!(
            "✅ Added to cart: {} x {}\n\n{}",
            quantity,
            product.name,
            cart_summary(&session.cart)
        );
        let buttons = [
            Button::new(ADD_MORE, "Add More"),
            Button::new(CHECKOUT, "Checkout"),
        ];
        self.ports.chat.send_buttons(phone, &text, &buttons).await
    }

    async fn handle_confirm_order(
        &self,
        phone: &str,
        session: &mut Session,
        normalized: &str,
    ) -> PortResult<()> {
        match normalized {
            ADD_MORE => {
                self.show_categories(phone, session, "🍸 What else would you like?")
                    .await
            }
            CHECKOUT => self.begin_checkout(phone, session).await,
            PAY_SELF => self.place_order(phone, session, phone).await,
            PAY_OTHER => {
                session.state = DialogueState::WaitingForPaymentPhone;
                self.ports
                    .chat
                    .send_text(
                        phone,
                        "📱 Please enter the M-PESA number to charge (e.g., 0712345678).",
                    )
                    .await
            }
            _ => {
                let buttons = match session.confirm_prompt {
                    ConfirmPrompt::CartActions => [
                        Button::new(ADD_MORE, "Add More"),
                        Button::new(CHECKOUT, "Checkout"),
                    ],
                    ConfirmPrompt::PaymentPhone => [
                        Button::new(PAY_SELF, "Use My Number"),
                        Button::new(PAY_OTHER, "Different Number"),
                    ],
                };
                self.ports
                    .chat
                    .send_buttons(phone, "Please choose an option below.", &buttons)
                    .await
            }
        }
    }

    async fn handle_payment_phone(
        &self,
        phone: &str,
        session: &mut Session,
        input: &str,
    ) -> PortResult<()> {
        match normalize_payment_phone(input) {
            Some(payment_phone) => self.place_order(phone, session, &payment_phone).await,
            None => {
                self.ports
                    .chat
                    .send_text(
                        phone,
                        "❌ That doesn't look like a valid M-PESA number. Please enter a number like 0712345678.",
                    )
                    .await
            }
        }
    }

    //=====================================================================================
    // Catalog Rendering
    //=====================================================================================

    /// Sends the ordered category list and moves to BROWSING.
    pub(super) async fn show_categories(
        &self,
        phone: &str,
        session: &mut Session,
        text: &str,
    ) -> PortResult<()> {
        let menu = self.ports.catalog.get_menu().await?;
        let categories = ordered_categories(&menu);
        session.scope = ProductScope::None;
        session.current_product_id = None;

        if categories.is_empty() {
            session.state = DialogueState::Start;
            return self
                .ports
                .chat
                .send_text(phone, "Sorry, the menu is empty right now. Please try again later.")
                .await;
        }

        session.state = DialogueState::Browsing;
        let rows: Vec<ListRow> = categories
            .into_iter()
            .map(|category| ListRow {
                id: category.clone(),
                title: category,
                description: None,
            })
            .collect();
        self.ports.chat.send_list(phone, text, "View Menu", &rows).await
    }

    async fn show_products(&self, phone: &str, heading: &str, products: &[Product]) -> PortResult<()> {
        let text = format!(
            "{heading}\n\n{}\n\nReply with the number or name of your drink.",
            numbered_listing(products)
        );
        if products.len() > MAX_LIST_ITEMS {
            return self.ports.chat.send_text(phone, &text).await;
        }
        let rows: Vec<ListRow> = products
            .iter()
            .map(|p| ListRow {
                id: p.id.to_string(),
                title: p.name.clone(),
                description: Some(format_kes(p.price)),
            })
            .collect();
        self.ports.chat.send_list(phone, &text, "Select Drink", &rows).await
    }

    async fn search(&self, query: &str) -> PortResult<Vec<Product>> {
        let results = self.ports.catalog.search_products(query).await?;
        Ok(active_sorted(results))
    }

    /// The products the customer is picking from, in the order they saw them.
    async fn active_products(&self, scope: &ProductScope) -> PortResult<Vec<Product>> {
        match scope {
            ProductScope::Category(category) => {
                let mut menu = self.ports.catalog.get_menu().await?;
                Ok(active_sorted(menu.remove(category).unwrap_or_default()))
            }
            ProductScope::Search(query) => self.search(query).await,
            ProductScope::None => Ok(Vec::new()),
        }
    }
}

fn active_sorted(products: Vec<Product>) -> Vec<Product> {
    sort_alphabetically(products.into_iter().filter(|p| p.is_active).collect())
}

/// The running cart: one line per item, then the grand total.
pub(super) fn cart_summary(cart: &Cart) -> String {
    let lines: String = cart
        .items
        .iter()
        .map(|item| {
            format!(
                "• {} x {} - {}\n",
                item.quantity,
                item.name,
                format_kes(item.subtotal())
            )
        })
        .collect();
    let total = cart.total();
    let payable = cart.payable_total();
    if payable == total {
        format!("🛒 *Your Cart:*\n{lines}\n*Total: {}*", format_kes(total))
    } else {
        format!(
            "🛒 *Your Cart:*\n{lines}\n*Total: {}* ({} rounded for M-PESA)",
            format_kes(payable),
            format_kes(total)
        )
    }
}
