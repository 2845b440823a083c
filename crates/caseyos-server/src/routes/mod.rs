//! Route modules for the CaseyOS API gateway.

pub mod actions;
pub mod admin;
pub mod command_queue;
pub mod drafts;
pub mod health;
pub mod notifications;
pub mod outcomes;
pub mod webhooks;
