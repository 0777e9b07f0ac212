//! Common test utilities for transfer-task integration tests

#[allow(dead_code)]
pub mod assertions;
#[allow(dead_code)]
pub mod transport;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use transport::*;
