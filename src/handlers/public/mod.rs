// handlers/public/mod.rs - endpoints that do not require a token

pub mod auth;
