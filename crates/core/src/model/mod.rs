pub mod completion;
pub mod span;
