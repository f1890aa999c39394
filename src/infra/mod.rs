mod discovery;
mod driver;
mod executable;
mod persist;

pub use discovery::*;
pub use driver::*;
pub use executable::*;
pub use persist::*;
