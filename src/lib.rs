//! dropnote - a self-hostable ephemeral content drop
//!
//! Deposit inline text or a binary blob, get back a pickup token, redeem it
//! under a dual expiry policy: absolute deadline and bounded read count.

pub mod blob;
pub mod cli;
pub mod clock;
pub mod config;
pub mod meta;
pub mod observability;
pub mod record;
pub mod store;
pub mod token;
