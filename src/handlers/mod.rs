// handlers/mod.rs - handler tiers
//
// Public (no auth) -> Protected (JWT) -> Tenant-scoped (JWT with tenant + membership)

pub mod protected;
pub mod public;
pub mod system;
