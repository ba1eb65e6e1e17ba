// Credential rotation module
// Author: kelexine (https://github.com/kelexine)

pub mod rate_limit;
mod rotator;

pub use rate_limit::RateLimitInfo;
pub use rotator::{Credential, CredentialRotator, CredentialStatus};
