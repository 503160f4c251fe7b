//! In-process event plumbing for the orchestrator.
//!
//! - [`EventBus`]: generic publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`ChangeFeed`]: the bus metadata stores publish every committed
//!   write on; the dispatch reconciler subscribes.
//! - [`CompletionInbox`]: the bus terminal events from the execution
//!   backend arrive on; the completion reconciler subscribes.

pub mod bus;

use ccf_core::change::ChangeRecord;
use ccf_core::completion::TerminalEvent;

pub use bus::{next_event, EventBus};

pub type ChangeFeed = EventBus<ChangeRecord>;

pub type CompletionInbox = EventBus<TerminalEvent>;
