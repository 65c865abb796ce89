mod change;
mod error;
mod observable;
mod observable_list;
mod operators;
mod scheduler;
mod source_list;
mod stream;
mod subject;
mod subscription;
mod utils;

pub use change::*;
pub use error::*;
pub use observable::*;
pub use observable_list::*;
pub use operators::*;
pub use scheduler::*;
pub use source_list::*;
pub use subject::*;
pub use subscription::*;
