pub mod cancel;
pub mod config;
pub mod error;
pub mod thread;

pub use cancel::CancelToken;
pub use config::{Config, LockConfig, SchedulerConfig, load_dotenv};
pub use error::*;
pub use thread::ThreadKey;
