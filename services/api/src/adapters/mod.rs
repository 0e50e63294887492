pub mod db;
pub mod kopokopo;
pub mod memory;
pub mod redis_store;
pub mod whatsapp;

pub use db::DbAdapter;
pub use kopokopo::KopoKopoClient;
pub use memory::InMemorySessionStore;
pub use redis_store::RedisSessionStore;
pub use whatsapp::WhatsAppClient;
