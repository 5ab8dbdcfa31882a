//! noncer relays mailbox announcements to a webhook.

pub mod announcements;
pub mod config;
pub mod convert;
pub mod cycle;
pub mod error;
pub mod handoff;
pub mod mailbox;
pub mod webhook;
