//! Push providers plugged into the dispatch core.

pub mod fcm;
