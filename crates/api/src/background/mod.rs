//! Long-lived background tasks spawned from `main`.

pub mod beat;
