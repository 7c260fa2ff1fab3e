//! Request handlers for the key-value API and change stream.

mod kv;
mod stream;

pub use kv::*;
pub use stream::*;
