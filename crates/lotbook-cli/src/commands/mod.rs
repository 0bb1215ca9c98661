pub mod common;
pub mod export;
pub mod lots;
pub mod photo;
pub mod sync;
