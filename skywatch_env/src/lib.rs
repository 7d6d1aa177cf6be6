//! Skywatch Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the Skywatch
//! engines to run against a **Production** tokio runtime or a seeded
//! **Simulation** harness.
//!
//! # Core Concept
//!
//! Engines never touch ambient time, timers or entropy directly:
//! - Time (`now()`, `sleep()`)
//! - Scheduling (`spawn()` returning an owned [`TaskHandle`])
//! - Randomness (`derive_rng()`)
//!
//! # Example
//!
//! ```ignore
//! use skywatch_env::ArenaContext;
//!
//! async fn tick_loop<Ctx: ArenaContext>(ctx: &Ctx) {
//!     let mut last = ctx.now();
//!     loop {
//!         ctx.sleep(Duration::from_millis(10)).await;
//!         let now = ctx.now();
//!         step(now - last);
//!         last = now;
//!     }
//! }
//! ```

mod context;
mod error;
mod task;
mod tokio_impl;

pub use context::ArenaContext;
pub use error::EnvError;
pub use task::TaskHandle;
pub use tokio_impl::TokioContext;
