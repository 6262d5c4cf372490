//! Context assembly, session management and the turn pipeline.
//!
//! A turn flows through [`ChatEngine::respond`]: session lookup, history
//! window, [`ContextAssembler`], the completion provider, the session's
//! regex pipeline, then history append.

pub mod characters;
pub mod chat;
pub mod context;
pub mod session;

pub use characters::CharacterRegistry;
pub use chat::{ChatEngine, GenerationSettings, InboundTurn, TurnReply};
pub use context::{AssembledContext, AssemblyInput, ContextAssembler};
pub use session::{Session, SessionDefaults, SessionInfo, SessionManager, SessionStats};
