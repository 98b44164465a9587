//! The MITM proxy engine and the worker process it runs inside.

pub mod buffered;
pub mod engine;
pub mod worker;

pub use engine::InterceptorHandler;
pub use worker::{WorkerArgs, run as run_worker};
