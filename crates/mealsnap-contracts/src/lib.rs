pub mod cache;
pub mod config;
pub mod events;
pub mod images;
pub mod meals;
pub mod records;
pub mod sink;
