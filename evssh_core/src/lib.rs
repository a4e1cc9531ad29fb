//! # Wire-level building blocks for the SSH transport layer ([RFC 4253])
//!
//! - binary packet framing arithmetic
//! - version banner scanning
//! - transport-generic and key-exchange messages
//! - cipher, MAC and compression capabilities
//!
//! [RFC 4253]: https://datatracker.ietf.org/doc/html/rfc4253

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod cipher;
pub mod compression;
pub mod data;
pub mod identifier;
pub mod mac;
pub mod message;
pub mod packet;
