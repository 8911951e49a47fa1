pub mod job;
pub mod request;
pub mod response;
pub mod webhook;

pub use job::*;
pub use request::*;
pub use response::*;
pub use webhook::*;
