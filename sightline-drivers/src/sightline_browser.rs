pub mod backend;
pub mod browser;
pub mod driver;
pub mod error;
pub mod fingerprint;
pub mod keys;
pub mod screenshots;
pub mod webdriver;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
