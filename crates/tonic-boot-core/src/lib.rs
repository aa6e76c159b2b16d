#![doc = include_str!("../README.md")]

mod common;
pub mod entry;
pub mod interceptor;
pub mod proto;

pub use common::*;
