pub mod cache;
pub mod convert;
pub mod generate;
pub mod util;
