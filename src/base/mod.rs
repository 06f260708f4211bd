pub mod monitor;
pub mod number_seq;
pub mod utils;
