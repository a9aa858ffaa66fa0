//! Wire messages for the menu bank.
//!
//! The bank is a protobuf blob shared between the catalog tooling and the
//! server. Keys of [`Bank::items`] are item slugs, the cart's line keys.

use std::collections::HashMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Bank {
    #[prost(map = "string, message", tag = "1")]
    pub items: HashMap<String, Item>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Item {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(bool, tag = "2")]
    pub available: bool,

    #[prost(uint32, tag = "3")]
    pub price_cents: u32,

    #[prost(string, tag = "4")]
    pub location: String,
}
