pub mod base;
pub mod chat;
pub mod conversation;
pub mod models;
