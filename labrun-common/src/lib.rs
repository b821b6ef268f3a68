pub mod files;
pub mod language;
pub mod result;
pub mod truncate;

pub use files::*;
pub use language::*;
pub use result::*;
pub use truncate::*;
