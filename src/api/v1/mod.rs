pub mod account;
pub mod auth;
pub mod feedback;
pub mod request;
pub mod token;
