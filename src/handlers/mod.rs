pub mod chat;
pub mod featured;
pub mod opportunities;
pub mod products;
pub mod users;
