pub mod chat;
pub mod feedback;
pub mod opportunity;
pub mod product;
pub mod user;
