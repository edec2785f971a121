pub mod error;
pub mod record;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::*;
pub use record::*;
pub use retry::*;
pub use traits::*;
pub use types::*;
