pub mod analyze;
pub mod batch;
pub mod check;
pub mod generate;
pub mod info;
