pub(crate) mod lock;
pub mod timezone;
