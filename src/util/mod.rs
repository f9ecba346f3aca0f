pub mod assert;
pub mod hint;
pub mod num;
