//! Sharded event dispatch over a `causeway-events` store.
//!
//! Flows register for `(domain, type)` pairs in a [`FlowTable`]. The
//! [`DispatchQueue`] routes each event to a shard by its stream key, upcasts
//! it to the flow's schema version and runs the handler. Handlers hand work
//! off to the [`SideEffectQueue`]. Both queues expose their depth as a
//! [`QueueSize`] signal, and [`drain`] turns that signal into "idle".

pub mod config;
pub mod dispatch;
pub mod drain;
pub mod engine;
pub mod error;
pub mod flow;
pub mod partition;
mod shard;
pub mod side_effect;
pub mod signal;
pub mod upcast;

pub use config::EngineConfig;
pub use dispatch::{routing_key, Delivery, DispatchCallback, DispatchQueue};
pub use drain::{complete_on_terminal_repeat, wait_until_idle, SideEffectSource, Step, TerminalRepeat};
pub use engine::{Engine, ReplayStats};
pub use error::DispatchError;
pub use flow::{from_fn, EventFlow, FlowContext, FlowHandler, FlowTable, FnFlow, Upcaster};
pub use partition::{djb2, partition};
pub use side_effect::{
    side_effect_fn, FnSideEffect, SideEffect, SideEffectCallback, SideEffectDelivery,
    SideEffectHandler, SideEffectQueue, SideEffectTable,
};
pub use signal::{QueueSize, SignalError, SizeReadings};
pub use upcast::upcast;
