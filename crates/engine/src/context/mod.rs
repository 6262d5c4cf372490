//! Context assembly: turning a session, its history window and a new user
//! message into the message list sent to the completion provider.
//!
//! | Source | Placement |
//! |--------|-----------|
//! | Order items before `chatHistory` | Leading messages, empty ones dropped |
//! | Opening line, history window, live message | The history block |
//! | Order items after `chatHistory` | Trailing messages, empty ones dropped |

pub mod assembler;
pub mod token;

pub use assembler::{AssembledContext, AssemblyInput, ContextAssembler};
