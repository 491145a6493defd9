//! VBoxDash Web API
//!
//! HTTP front end that turns dashboard actions into provisioning script runs
//! and keeps the instance store in step with what the scripts report.

pub mod activity;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod supabase;

pub use auth::{AuthError, Caller, IdentityProvider, JwtIdentityProvider, SupabaseIdentityProvider};
pub use config::{ConfigOverrides, DashboardConfig};
pub use error::ApiError;
pub use server::{router, serve, AppState, StoreProvider};
pub use supabase::{SupabaseSettings, SupabaseStore};
