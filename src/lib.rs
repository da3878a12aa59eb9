pub mod app;
pub mod archive;
pub mod client;
pub mod config;
pub mod dicomweb;
pub mod domain;
pub mod error;
pub mod multipart;
pub mod output;
pub mod p10;
pub mod progress;
pub mod reference;
pub mod retrieve;
