pub mod error;
pub mod exec;
pub mod common;
pub mod pool;
pub mod tunnel;
pub mod local_link;
pub mod switch;
pub mod cleanup;

#[cfg(test)]
pub(crate) mod testing;

pub use common::DriverCommon;
pub use error::DriverError;
pub use switch::NoviSwitch;

/// Helper macro to convert Vec<&str> to Vec<String> to avoid having to keep writing `.to_string()`
#[macro_export]
macro_rules! vec_of_strings {
    ($($x:expr),*) => (vec![$($x.to_string()),*]);
}

/// The switch CLI has no error codes, failures are only visible as text in the response
pub fn is_device_error(response: &str) -> bool {
    response.to_lowercase().contains("error")
}
