pub mod base;
pub mod errors;
pub mod formats;
pub mod google;
pub mod mock;

pub use base::{Provider, ProviderUsage, Usage};
pub use errors::ProviderError;
