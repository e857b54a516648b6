pub mod data;
pub mod helpers;
pub mod payloads;

pub use helpers::is_supported_url;
