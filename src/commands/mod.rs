//! Request handlers, one module per area of the API.

pub mod chat;
pub mod form;
pub mod health;
pub mod knowledge;
pub mod settings;
