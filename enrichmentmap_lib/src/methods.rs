pub mod coefficient;
pub mod filter;
pub mod signature;
pub mod similarity;
