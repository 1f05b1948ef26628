pub mod cache;
pub mod gateway;
pub mod rest;
pub mod types;
