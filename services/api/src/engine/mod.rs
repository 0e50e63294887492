//! services/api/src/engine/mod.rs
//!
//! The conversational side of the bot: the Dialogue Engine, its checkout step
//! and the pending-payment follow-up.

pub mod checkout;
pub mod dialogue;
pub mod followup;

pub use dialogue::{DialogueEngine, EnginePorts, EngineSettings};
pub use followup::FollowUpScheduler;
