pub mod catalog;
pub mod domain;
pub mod phone;
pub mod ports;

pub use domain::{
    Button, Cart, CartItem, ChargeRequest, ConfirmPrompt, DialogueState, ListRow, Menu, Order,
    OrderItem, OrderStatus, PaymentMethod, PaymentWebhookResult, Product, ProductScope, Session,
    StaffRole, StaffUser, TransitionOutcome, User,
};
pub use ports::{
    CatalogService, ChatGateway, OrderRepository, PaymentGateway, PortError, PortResult,
    SessionStore, StaffRepository, UserRepository,
};
