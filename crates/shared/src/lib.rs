//! Types shared by the chat server and its clients.

pub mod domain;
pub mod error;
pub mod protocol;
