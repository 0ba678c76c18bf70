pub mod provider;
pub mod registration;
pub mod session;

pub use provider::provider_login;
pub use registration::{register, verify_code};
pub use session::{global_logout, login, logout, refresh, request_login_code};
