//! Change detection against the record store.

pub mod fingerprint;
