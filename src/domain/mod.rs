mod prompt;
mod report;
mod stats;
mod stream;
mod types;

pub use prompt::*;
pub use report::*;
pub use stats::*;
pub use stream::*;
pub use types::*;
