//! AG-UI protocol support: wire types, the event vocabulary and the adapter
//! that runs an agent for an AG-UI client.
//!
//! See: <https://docs.ag-ui.com>

mod adapter;
mod events;
mod types;

pub use adapter::{AgUiAdapter, DEFAULT_SESSION_TIMEOUT};
pub use events::{BaseEvent, Event};
pub use types::{
    build_context_addendum, Context, Message, RequestError, Role, RunAgentInput, Tool,
};
