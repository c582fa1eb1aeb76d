pub mod comment;
pub mod request;
pub mod user;
