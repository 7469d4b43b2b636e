pub mod hashing;
pub mod similarity;
pub mod text;
