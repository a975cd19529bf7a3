pub mod definition_check;

pub use definition_check::{check_tokens, Report, Resolution, Unresolved};
