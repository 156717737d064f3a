//! Serializable events a host application forwards to its UI or logs.

pub mod events;
