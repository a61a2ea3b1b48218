pub mod bot;
pub mod config;
pub mod fics;
pub mod ring;
pub mod sink;
pub mod store;
pub mod web;
