//! Realtime synthesis session state machine
//!
//! Transport-free: the machine consumes decoded upstream events, binary
//! audio and fallback-timer expiries, and answers with [`SessionAction`]s
//! for the owning connection task to carry out (send a message, arm or
//! cancel the timer, append audio, finish, fail). It is owned by exactly one
//! task, so it needs no synchronization.
//!
//! ```text
//! AWAIT_CREATED --session.created--> AWAIT_UPDATED    send session.update, arm fallback
//! AWAIT_UPDATED --session.updated--> INPUT_SENT       cancel fallback, send append + commit
//! AWAIT_UPDATED --fallback fires---> INPUT_SENT       same, at most once
//! INPUT_SENT    --audio------------> AWAIT_DONE
//! INPUT_SENT | AWAIT_DONE --response.done--> FINISHING  send session.finish
//! FINISHING     --session.finished-> FINISHED
//! any           --error------------> ERRORED
//! ```

mod state;

pub use state::{CloseDisposition, SessionAction, SessionMachine, SessionRole, SessionState};
