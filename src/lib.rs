//! Collects new posts from a list of RSS/Atom feeds into one time-ordered
//! digest, converts it to an e-book and mails it to an e-reader.

pub mod config;
pub mod convert;
pub mod digest;
pub mod feed;
pub mod mail;
pub mod render;
pub mod watermark;
