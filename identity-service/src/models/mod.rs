pub mod account;
pub mod auth_method;
pub mod refresh_token;
pub mod verification_code;

pub use account::{Account, AccountStatus, AccountSummary, Role};
pub use auth_method::{AuthMethod, Provider};
pub use refresh_token::{ClientMeta, RefreshToken};
pub use verification_code::VerificationCode;
