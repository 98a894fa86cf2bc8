//! Authenticator implementations

pub mod token;

pub use token::TokenAuthority;
