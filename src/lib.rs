pub mod config;
pub mod db;
pub mod discounts;
pub mod error;

pub use discounts::DiscountService;
pub use error::{DiscountError, DiscountResult, ErrorKind};
