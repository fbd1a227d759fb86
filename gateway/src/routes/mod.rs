//! HTTP routes served next to the relay endpoint.

pub mod health;
